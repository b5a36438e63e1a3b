//! On-disk record layouts.
//!
//! Fixed layouts are encoded by hand, little-endian, and every decode
//! validates lengths before slicing. Positions are stored as `i64`-width
//! fields with zero meaning null.

use crate::error::{Result, StrataError};
use crate::store::Position;

/// Base-10 fan-out of the radix index.
pub const RADIX: usize = 10;

/// Child slots per bitmap node: one per digit plus the reserved
/// record-reference slot used by the pure-bitmap map.
pub const NODE_SLOTS: usize = RADIX + 1;

/// Index of the reserved record-reference slot.
pub const RESERVED_SLOT: usize = RADIX;

/// Encoded size of a bitmap node.
pub const BITMAP_NODE_SIZE: usize = NODE_SLOTS * 8;

/// Encoded size of a map header.
pub const MAP_HEADER_SIZE: usize = 16;

/// Fixed-field prefix of a record reference, before key and value bytes.
pub const REF_HEADER_SIZE: usize = 20;

/// Fixed-field prefix of a skip node, including the size prefix.
pub const SKIP_NODE_FIXED: usize = 37;

// Decode guard; no legitimate node approaches this.
const MAX_SKIP_NODE_SIZE: u32 = 1 << 24;

/// Per-map header: entry point of the radix tree plus the live record
/// count. Layout: `[first_node: i64][record_count: i64]`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MapHeader {
    pub first_node: Position,
    pub record_count: u64,
}

impl MapHeader {
    pub fn encode(&self) -> [u8; MAP_HEADER_SIZE] {
        let mut buf = [0u8; MAP_HEADER_SIZE];
        buf[..8].copy_from_slice(&self.first_node.to_le_bytes());
        buf[8..].copy_from_slice(&self.record_count.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAP_HEADER_SIZE {
            return Err(StrataError::Corruption("map header truncated".into()));
        }
        Ok(Self {
            first_node: Position::from_le_bytes(bytes[..8].try_into().expect("slice is 8 bytes")),
            record_count: u64::from_le_bytes(bytes[8..16].try_into().expect("slice is 8 bytes")),
        })
    }
}

/// One radix fan-out node: eleven child positions.
///
/// Slots 0..=9 are indexed by hash digit and hold either a deeper bitmap
/// node or, at terminal depth, a bucket entry (skip-list head or record
/// chain). Slot 10 is the reserved record-reference slot. Bitmap nodes
/// are never deallocated; the tree only grows.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BitmapNode {
    pub position: Position,
    pub children: [Position; NODE_SLOTS],
}

impl BitmapNode {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            children: [Position::NULL; NODE_SLOTS],
        }
    }

    pub fn encode(&self) -> [u8; BITMAP_NODE_SIZE] {
        let mut buf = [0u8; BITMAP_NODE_SIZE];
        for (i, child) in self.children.iter().enumerate() {
            buf[i * 8..(i + 1) * 8].copy_from_slice(&child.to_le_bytes());
        }
        buf
    }

    pub fn decode(position: Position, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BITMAP_NODE_SIZE {
            return Err(StrataError::Corruption("bitmap node truncated".into()));
        }
        let mut children = [Position::NULL; NODE_SLOTS];
        for (i, child) in children.iter_mut().enumerate() {
            *child = Position::from_le_bytes(
                bytes[i * 8..(i + 1) * 8]
                    .try_into()
                    .expect("slice is 8 bytes"),
            );
        }
        Ok(Self { position, children })
    }
}

/// Fixed header of a collision-chain record.
///
/// Followed on disk by `key_size` bytes of encoded key, then
/// `record_size - key_size` bytes of encoded value. Layout:
/// `[key_size: i32][record_size: i32][serializer_id: i32][next: i64]`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RecordReference {
    pub position: Position,
    pub key_size: u32,
    pub record_size: u32,
    pub serializer_id: u32,
    pub next: Position,
}

impl RecordReference {
    pub fn encode(&self) -> [u8; REF_HEADER_SIZE] {
        let mut buf = [0u8; REF_HEADER_SIZE];
        buf[..4].copy_from_slice(&self.key_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.record_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.serializer_id.to_le_bytes());
        buf[12..20].copy_from_slice(&self.next.to_le_bytes());
        buf
    }

    pub fn decode(position: Position, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REF_HEADER_SIZE {
            return Err(StrataError::Corruption("record reference truncated".into()));
        }
        let key_size = u32::from_le_bytes(bytes[..4].try_into().expect("slice is 4 bytes"));
        let record_size = u32::from_le_bytes(bytes[4..8].try_into().expect("slice is 4 bytes"));
        if key_size > record_size {
            return Err(StrataError::Corruption(format!(
                "record reference at {position} claims key {key_size} beyond record {record_size}"
            )));
        }
        Ok(Self {
            position,
            key_size,
            record_size,
            serializer_id: u32::from_le_bytes(bytes[8..12].try_into().expect("slice is 4 bytes")),
            next: Position::from_le_bytes(bytes[12..20].try_into().expect("slice is 8 bytes")),
        })
    }

    /// Store offset of the encoded key.
    pub fn key_position(&self) -> Position {
        Position(self.position.0 + REF_HEADER_SIZE as u64)
    }

    /// Store offset of the encoded value.
    pub fn value_position(&self) -> Position {
        Position(self.position.0 + REF_HEADER_SIZE as u64 + self.key_size as u64)
    }

    pub fn value_size(&self) -> u32 {
        self.record_size - self.key_size
    }

    /// Bytes occupied by the whole slot: header, key, value.
    pub fn slot_size(&self) -> u64 {
        REF_HEADER_SIZE as u64 + self.record_size as u64
    }
}

/// One skip-list tower node.
///
/// A head node carries an empty key. The value payload lives separately
/// at `record_position`; `down` links the same key one level lower,
/// `next` the successor on the same level. Layout: `[total_size: i32]`
/// then `[record_position: i64][record_size: i32][level: i8][next: i64]
/// [down: i64][serializer_id: i32]`, then the encoded key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SkipNode {
    pub position: Position,
    pub key: Vec<u8>,
    pub record_position: Position,
    pub record_size: u32,
    pub level: i8,
    pub next: Position,
    pub down: Position,
    pub serializer_id: u32,
}

impl SkipNode {
    /// A level-`level` head node (empty key, no payload).
    pub fn head(position: Position, level: i8) -> Self {
        Self {
            position,
            key: Vec::new(),
            record_position: Position::NULL,
            record_size: 0,
            level,
            next: Position::NULL,
            down: Position::NULL,
            serializer_id: 0,
        }
    }

    pub fn is_head(&self) -> bool {
        self.key.is_empty()
    }

    /// Encoded size of this node on disk.
    pub fn encoded_size(&self) -> usize {
        SKIP_NODE_FIXED + self.key.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let total = self.encoded_size();
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_le_bytes());
        buf.extend_from_slice(&self.record_position.to_le_bytes());
        buf.extend_from_slice(&self.record_size.to_le_bytes());
        buf.push(self.level as u8);
        buf.extend_from_slice(&self.next.to_le_bytes());
        buf.extend_from_slice(&self.down.to_le_bytes());
        buf.extend_from_slice(&self.serializer_id.to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf
    }

    /// Reads the leading size prefix, validating it against the guard cap.
    pub fn decode_size_prefix(bytes: &[u8]) -> Result<u32> {
        if bytes.len() < 4 {
            return Err(StrataError::Corruption("skip node prefix truncated".into()));
        }
        let total = u32::from_le_bytes(bytes[..4].try_into().expect("slice is 4 bytes"));
        if total < SKIP_NODE_FIXED as u32 || total > MAX_SKIP_NODE_SIZE {
            return Err(StrataError::Corruption(format!(
                "skip node size {total} outside sane bounds"
            )));
        }
        Ok(total)
    }

    /// Decodes a full node image, size prefix included.
    pub fn decode(position: Position, bytes: &[u8]) -> Result<Self> {
        let total = Self::decode_size_prefix(bytes)? as usize;
        if bytes.len() < total {
            return Err(StrataError::Corruption("skip node truncated".into()));
        }
        Ok(Self {
            position,
            record_position: Position::from_le_bytes(
                bytes[4..12].try_into().expect("slice is 8 bytes"),
            ),
            record_size: u32::from_le_bytes(bytes[12..16].try_into().expect("slice is 4 bytes")),
            level: bytes[16] as i8,
            next: Position::from_le_bytes(bytes[17..25].try_into().expect("slice is 8 bytes")),
            down: Position::from_le_bytes(bytes[25..33].try_into().expect("slice is 8 bytes")),
            serializer_id: u32::from_le_bytes(bytes[33..37].try_into().expect("slice is 4 bytes")),
            key: bytes[SKIP_NODE_FIXED..total].to_vec(),
        })
    }
}
