#![allow(unsafe_code)]

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, StrataError};
use crate::store::{Position, Store};

const MAGIC: &[u8; 8] = b"STRATA\0\0";
const VERSION_MAJOR: u16 = 1;
const VERSION_MINOR: u16 = 0;

pub(crate) const SUPERBLOCK_SIZE: u64 = 64;

/// File-backed arena store.
///
/// Allocations are bump-allocated from the file tail; `deallocate` feeds
/// size-binned free lists consulted before the tail grows. The free lists
/// are in-memory only: slots freed in a session that never reuses them
/// remain garbage after reopen, which callers accept in exchange for a
/// crash-safe superblock (spanning only the magic, version, allocation
/// tail, and root slot, guarded by a CRC).
pub struct FileStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").finish_non_exhaustive()
    }
}

struct Inner {
    file: File,
    file_len: u64,
    next_alloc: u64,
    root: Position,
    free_lists: HashMap<u64, Vec<u64>>,
    mmap: Option<Mmap>,
    use_mmap: bool,
}

impl FileStore {
    /// Opens or creates an arena file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, true)
    }

    pub fn open_with_config(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let file_len = file.metadata()?.len();

        let mut inner = Inner {
            file,
            file_len,
            next_alloc: SUPERBLOCK_SIZE,
            root: Position::NULL,
            free_lists: HashMap::new(),
            mmap: None,
            use_mmap,
        };

        if file_len == 0 {
            inner.write_superblock()?;
        } else {
            inner.read_superblock()?;
        }

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }
}

impl Store for FileStore {
    fn allocate(&self, size: u64) -> Result<Position> {
        if size == 0 {
            return Err(StrataError::InvalidArgument(
                "zero-length allocation".into(),
            ));
        }
        let mut inner = self.inner.lock();
        if let Some(slots) = inner.free_lists.get_mut(&size) {
            if let Some(offset) = slots.pop() {
                return Ok(Position(offset));
            }
        }
        let offset = inner.next_alloc;
        inner.next_alloc = offset
            .checked_add(size)
            .ok_or_else(|| StrataError::InvalidArgument("allocation overflows arena".into()))?;
        Ok(Position(offset))
    }

    fn deallocate(&self, position: Position, size: u64) -> Result<()> {
        if position.is_null() || size == 0 {
            return Err(StrataError::InvalidArgument(
                "deallocate of null or empty slot".into(),
            ));
        }
        let mut inner = self.inner.lock();
        inner.free_lists.entry(size).or_default().push(position.0);
        debug!(position = position.0, size, "slot returned to free list");
        Ok(())
    }

    fn read(&self, position: Position, len: usize) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.check_bounds(position, len)?;

        let offset = position.0 as usize;
        let mut buf = vec![0u8; len];

        inner.ensure_mmap()?;
        if let Some(ref mmap) = inner.mmap {
            if offset + len <= mmap.len() {
                buf.copy_from_slice(&mmap[offset..offset + len]);
                return Ok(buf);
            }
        }

        if (offset as u64) < inner.file_len {
            inner.file.seek(SeekFrom::Start(offset as u64))?;
            let bytes_read = inner.file.read(&mut buf)?;
            if bytes_read < buf.len() {
                buf[bytes_read..].fill(0);
            }
        }
        // Allocated but never written: stays zeroed.
        Ok(buf)
    }

    fn write(&self, position: Position, bytes: &[u8]) -> Result<()> {
        if position.is_null() {
            return Err(StrataError::InvalidArgument(
                "write through null position".into(),
            ));
        }
        let mut inner = self.inner.lock();
        inner.check_bounds(position, bytes.len())?;
        inner.write_at(position.0, bytes)
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.write_superblock()?;
        inner.file.sync_data()?;
        Ok(())
    }

    fn root(&self) -> Result<Position> {
        Ok(self.inner.lock().root)
    }

    fn set_root(&self, position: Position) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.root = position;
        inner.write_superblock()
    }
}

impl Inner {
    fn check_bounds(&self, position: Position, len: usize) -> Result<()> {
        let end = position
            .0
            .checked_add(len as u64)
            .ok_or_else(|| StrataError::InvalidArgument("access overflows arena".into()))?;
        if position.0 < SUPERBLOCK_SIZE || end > self.next_alloc {
            return Err(StrataError::Corruption(format!(
                "access at {position} len {len} outside allocated arena"
            )));
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        let end = offset + bytes.len() as u64;
        if end > self.file_len {
            self.file_len = end;
        }
        // The map no longer reflects the file; rebuild lazily on read.
        self.mmap = None;
        Ok(())
    }

    fn ensure_mmap(&mut self) -> Result<()> {
        if self.use_mmap && self.mmap.is_none() && self.file_len > 0 {
            self.file.sync_data()?;
            self.mmap = unsafe { Mmap::map(&self.file).ok() };
        }
        Ok(())
    }

    fn write_superblock(&mut self) -> Result<()> {
        let mut block = [0u8; SUPERBLOCK_SIZE as usize];
        block[..MAGIC.len()].copy_from_slice(MAGIC);
        block[8..10].copy_from_slice(&VERSION_MAJOR.to_le_bytes());
        block[10..12].copy_from_slice(&VERSION_MINOR.to_le_bytes());
        block[16..24].copy_from_slice(&self.next_alloc.to_le_bytes());
        block[24..32].copy_from_slice(&self.root.to_le_bytes());
        let crc = crc32fast::hash(&block[16..]);
        block[12..16].copy_from_slice(&crc.to_le_bytes());
        self.write_at(0, &block)
    }

    fn read_superblock(&mut self) -> Result<()> {
        if self.file_len < SUPERBLOCK_SIZE {
            return Err(StrataError::Corruption(
                "arena file shorter than superblock".into(),
            ));
        }
        self.file.seek(SeekFrom::Start(0))?;
        let mut block = [0u8; SUPERBLOCK_SIZE as usize];
        self.file.read_exact(&mut block)?;

        if &block[..MAGIC.len()] != MAGIC {
            return Err(StrataError::Corruption("invalid arena magic".into()));
        }
        let major = u16::from_le_bytes([block[8], block[9]]);
        let minor = u16::from_le_bytes([block[10], block[11]]);
        if major != VERSION_MAJOR || minor > VERSION_MINOR {
            return Err(StrataError::Corruption(format!(
                "unsupported arena version {major}.{minor}"
            )));
        }
        let stored_crc = u32::from_le_bytes([block[12], block[13], block[14], block[15]]);
        if crc32fast::hash(&block[16..]) != stored_crc {
            return Err(StrataError::Corruption("arena superblock crc mismatch".into()));
        }

        let next_alloc = u64::from_le_bytes(block[16..24].try_into().expect("slice is 8 bytes"));
        // A crash after allocation but before the superblock flush leaves
        // the recorded tail behind the file; resume past whichever is larger.
        self.next_alloc = next_alloc.max(self.file_len).max(SUPERBLOCK_SIZE);
        self.root = Position::from_le_bytes(block[24..32].try_into().expect("slice is 8 bytes"));
        Ok(())
    }
}
