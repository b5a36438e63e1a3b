use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Result, StrataError};
use crate::store::{Position, Store};

// Keep offset zero unused so Position::NULL never aliases an allocation.
const ARENA_BASE: u64 = 8;

/// In-process arena store.
///
/// Backs detached/headless sub-maps and tests. Same contract as
/// [`crate::store::FileStore`], minus persistence.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

struct Inner {
    arena: Vec<u8>,
    next_alloc: u64,
    root: Position,
    free_lists: HashMap<u64, Vec<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                arena: vec![0; ARENA_BASE as usize],
                next_alloc: ARENA_BASE,
                root: Position::NULL,
                free_lists: HashMap::new(),
            }),
        }
    }

    /// Bytes currently reserved, including freed slots.
    pub fn allocated_bytes(&self) -> u64 {
        self.inner.read().next_alloc - ARENA_BASE
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn allocate(&self, size: u64) -> Result<Position> {
        if size == 0 {
            return Err(StrataError::InvalidArgument(
                "zero-length allocation".into(),
            ));
        }
        let mut inner = self.inner.write();
        if let Some(slots) = inner.free_lists.get_mut(&size) {
            if let Some(offset) = slots.pop() {
                return Ok(Position(offset));
            }
        }
        let offset = inner.next_alloc;
        let end = offset
            .checked_add(size)
            .ok_or_else(|| StrataError::InvalidArgument("allocation overflows arena".into()))?;
        inner.next_alloc = end;
        if inner.arena.len() < end as usize {
            inner.arena.resize(end as usize, 0);
        }
        Ok(Position(offset))
    }

    fn deallocate(&self, position: Position, size: u64) -> Result<()> {
        if position.is_null() || size == 0 {
            return Err(StrataError::InvalidArgument(
                "deallocate of null or empty slot".into(),
            ));
        }
        let mut inner = self.inner.write();
        inner.free_lists.entry(size).or_default().push(position.0);
        Ok(())
    }

    fn read(&self, position: Position, len: usize) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let start = position.0 as usize;
        let end = start
            .checked_add(len)
            .ok_or_else(|| StrataError::InvalidArgument("access overflows arena".into()))?;
        if position.0 < ARENA_BASE || end > inner.arena.len() {
            return Err(StrataError::Corruption(format!(
                "access at {position} len {len} outside allocated arena"
            )));
        }
        Ok(inner.arena[start..end].to_vec())
    }

    fn write(&self, position: Position, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        let start = position.0 as usize;
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| StrataError::InvalidArgument("access overflows arena".into()))?;
        if position.0 < ARENA_BASE || end > inner.arena.len() {
            return Err(StrataError::Corruption(format!(
                "write at {position} len {} outside allocated arena",
                bytes.len()
            )));
        }
        inner.arena[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn root(&self) -> Result<Position> {
        Ok(self.inner.read().root)
    }

    fn set_root(&self, position: Position) -> Result<()> {
        self.inner.write().root = position;
        Ok(())
    }
}
