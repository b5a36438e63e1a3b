//! Radix bitmap index.
//!
//! A digit-indexed fan-out tree over the key hash, truncated at the
//! configured load factor. Terminal slots address either a collision
//! chain of records (pure-bitmap mode, via the reserved slot) or a
//! skip-list head (hybrid mode, via the final digit's slot).

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::PositionCache;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::index::{hash_digits, key_hash, DigitPath, KeyComparer, MapOptions};
use crate::lock::LevelLock;
use crate::record::{
    BitmapNode, MapHeader, RecordReference, BITMAP_NODE_SIZE, MAP_HEADER_SIZE, RADIX,
    REF_HEADER_SIZE, RESERVED_SLOT,
};
use crate::store::{Position, Store};

/// Terminal slot range used by the hybrid map (one bucket per digit).
pub(crate) const DIGIT_SLOTS: Range<usize> = 0..RADIX;

/// Node-level access to the radix tree.
///
/// Upper tree nodes are shared across level locks (the root serves every
/// top digit), so structural mutations (linking a child, rewriting a
/// bucket slot) serialize on `structure` to avoid lost updates between
/// read-modify-write cycles. Lookups never take it.
pub(crate) struct RadixTree {
    store: Arc<dyn Store>,
    nodes: PositionCache<BitmapNode>,
    structure: Mutex<()>,
}

impl RadixTree {
    pub fn new(store: Arc<dyn Store>, cache_size: usize) -> Self {
        Self {
            store,
            nodes: PositionCache::new(cache_size),
            structure: Mutex::new(()),
        }
    }

    pub fn read_node(&self, position: Position) -> Result<BitmapNode> {
        if let Some(node) = self.nodes.get(position) {
            return Ok(node);
        }
        let bytes = self.store.read(position, BITMAP_NODE_SIZE)?;
        let node = BitmapNode::decode(position, &bytes)?;
        self.nodes.put(position, node.clone());
        Ok(node)
    }

    pub fn write_node(&self, node: &BitmapNode) -> Result<()> {
        self.store.write(node.position, &node.encode())?;
        self.nodes.put(node.position, node.clone());
        Ok(())
    }

    pub fn allocate_node(&self) -> Result<BitmapNode> {
        let position = self.store.allocate(BITMAP_NODE_SIZE as u64)?;
        let node = BitmapNode::new(position);
        self.write_node(&node)?;
        Ok(node)
    }

    /// Walks one child hop per digit. Missing links are allocated and
    /// wired in when `for_insert` is set, otherwise the walk reports the
    /// path absent.
    pub fn seek(
        &self,
        root: Position,
        hops: &[u8],
        for_insert: bool,
    ) -> Result<Option<BitmapNode>> {
        if !for_insert {
            return self.seek_existing(root, hops);
        }
        // Fast path: the full path usually exists already.
        if let Some(node) = self.seek_existing(root, hops)? {
            return Ok(Some(node));
        }
        let _structure = self.structure.lock();
        let mut current = self.read_node(root)?;
        for &digit in hops {
            let child = current.children[digit as usize];
            if child.is_null() {
                let fresh = self.allocate_node()?;
                current.children[digit as usize] = fresh.position;
                self.write_node(&current)?;
                debug!(
                    parent = current.position.0,
                    digit,
                    child = fresh.position.0,
                    "bitmap node linked"
                );
                current = fresh;
            } else {
                current = self.read_node(child)?;
            }
        }
        Ok(Some(current))
    }

    fn seek_existing(&self, root: Position, hops: &[u8]) -> Result<Option<BitmapNode>> {
        let mut current = self.read_node(root)?;
        for &digit in hops {
            let child = current.children[digit as usize];
            if child.is_null() {
                return Ok(None);
            }
            current = self.read_node(child)?;
        }
        Ok(Some(current))
    }

    /// Atomically points `owner.children[slot]` at `child`.
    pub fn link_slot(&self, owner: Position, slot: usize, child: Position) -> Result<()> {
        let _structure = self.structure.lock();
        let mut node = self.read_node(owner)?;
        node.children[slot] = child;
        self.write_node(&node)
    }

    /// Collects every non-null terminal slot `hops` levels below `root`,
    /// optionally restricted to one top-level digit.
    pub fn collect_buckets(
        &self,
        root: Position,
        hops: usize,
        slots: Range<usize>,
        top_digit: Option<u8>,
    ) -> Result<Vec<Position>> {
        if root.is_null() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        match top_digit {
            // With no hops left, the top digit indexes a slot directly.
            Some(digit) if hops == 0 => {
                let node = self.read_node(root)?;
                let child = node.children[digit as usize];
                if slots.contains(&(digit as usize)) && !child.is_null() {
                    out.push(child);
                }
            }
            Some(digit) => {
                let node = self.read_node(root)?;
                let child = node.children[digit as usize];
                if !child.is_null() {
                    self.walk(child, hops - 1, &slots, &mut out)?;
                }
            }
            None => self.walk(root, hops, &slots, &mut out)?,
        }
        Ok(out)
    }

    fn walk(
        &self,
        position: Position,
        remaining: usize,
        slots: &Range<usize>,
        out: &mut Vec<Position>,
    ) -> Result<()> {
        let node = self.read_node(position)?;
        if remaining == 0 {
            for slot in slots.clone() {
                let child = node.children[slot];
                if !child.is_null() {
                    out.push(child);
                }
            }
            return Ok(());
        }
        for digit in 0..RADIX {
            let child = node.children[digit];
            if !child.is_null() {
                self.walk(child, remaining - 1, slots, out)?;
            }
        }
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.nodes.clear();
    }
}

/// Record-slot access for collision chains.
pub(crate) struct RecordIo {
    store: Arc<dyn Store>,
    refs: PositionCache<RecordReference>,
}

impl RecordIo {
    pub fn new(store: Arc<dyn Store>, cache_size: usize) -> Self {
        Self {
            store,
            refs: PositionCache::new(cache_size),
        }
    }

    pub fn read_ref(&self, position: Position) -> Result<RecordReference> {
        if let Some(reference) = self.refs.get(position) {
            return Ok(reference);
        }
        let bytes = self.store.read(position, REF_HEADER_SIZE)?;
        let reference = RecordReference::decode(position, &bytes)?;
        self.refs.put(position, reference);
        Ok(reference)
    }

    pub fn write_ref(&self, reference: &RecordReference) -> Result<()> {
        self.store.write(reference.position, &reference.encode())?;
        self.refs.put(reference.position, *reference);
        Ok(())
    }

    pub fn read_key(&self, reference: &RecordReference) -> Result<Vec<u8>> {
        self.store
            .read(reference.key_position(), reference.key_size as usize)
    }

    pub fn read_value(&self, reference: &RecordReference) -> Result<Vec<u8>> {
        if reference.value_size() == 0 {
            return Ok(Vec::new());
        }
        self.store
            .read(reference.value_position(), reference.value_size() as usize)
    }

    /// Allocates and writes a whole record slot: header, key, value.
    pub fn create_record(
        &self,
        key: &[u8],
        value: &[u8],
        serializer_id: u32,
        next: Position,
    ) -> Result<RecordReference> {
        let reference = RecordReference {
            position: self
                .store
                .allocate((REF_HEADER_SIZE + key.len() + value.len()) as u64)?,
            key_size: key.len() as u32,
            record_size: (key.len() + value.len()) as u32,
            serializer_id,
            next,
        };
        let mut image = Vec::with_capacity(reference.slot_size() as usize);
        image.extend_from_slice(&reference.encode());
        image.extend_from_slice(key);
        image.extend_from_slice(value);
        self.store.write(reference.position, &image)?;
        self.refs.put(reference.position, reference);
        Ok(reference)
    }

    pub fn forget(&self, position: Position) {
        self.refs.pop(position);
    }

    pub fn clear_cache(&self) {
        self.refs.clear();
    }
}

/// Hash map over the full radix depth, collision chains at the leaves.
///
/// No ordering and no range queries; the hybrid map supersedes it
/// wherever ordered iteration matters. Kept for upper layers that index
/// by identity only.
pub struct BitmapMap {
    store: Arc<dyn Store>,
    config: Config,
    comparer: Arc<dyn KeyComparer>,
    registry: crate::serializer::SerializerRegistry,
    tree: RadixTree,
    records: RecordIo,
    header_position: Position,
    first_node: Mutex<Position>,
    record_count: AtomicU64,
    locks: LevelLock,
}

impl std::fmt::Debug for BitmapMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapMap")
            .field("header_position", &self.header_position)
            .field("record_count", &self.record_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BitmapMap {
    /// Allocates a fresh map header in `store`.
    pub fn create(store: Arc<dyn Store>, config: Config) -> Result<Self> {
        Self::create_with_options(store, config, MapOptions::default())
    }

    pub fn create_with_options(
        store: Arc<dyn Store>,
        config: Config,
        options: MapOptions,
    ) -> Result<Self> {
        config.validate()?;
        let header_position = store.allocate(MAP_HEADER_SIZE as u64)?;
        let header = MapHeader {
            first_node: Position::NULL,
            record_count: 0,
        };
        store.write(header_position, &header.encode())?;
        Self::build(store, header_position, header, config, options)
    }

    /// Opens a map whose header lives at `header_position`.
    pub fn open(store: Arc<dyn Store>, header_position: Position, config: Config) -> Result<Self> {
        Self::open_with_options(store, header_position, config, MapOptions::default())
    }

    pub fn open_with_options(
        store: Arc<dyn Store>,
        header_position: Position,
        config: Config,
        options: MapOptions,
    ) -> Result<Self> {
        config.validate()?;
        let bytes = store.read(header_position, MAP_HEADER_SIZE)?;
        let header = MapHeader::decode(&bytes)?;
        Self::build(store, header_position, header, config, options)
    }

    fn build(
        store: Arc<dyn Store>,
        header_position: Position,
        header: MapHeader,
        config: Config,
        options: MapOptions,
    ) -> Result<Self> {
        let locks = if options.detached {
            LevelLock::noop()
        } else {
            LevelLock::new(RADIX, config.lock_timeout)
        };
        Ok(Self {
            tree: RadixTree::new(Arc::clone(&store), config.node_cache_size),
            records: RecordIo::new(Arc::clone(&store), config.skip_node_cache_size),
            store,
            comparer: options.comparer,
            registry: options.registry,
            header_position,
            first_node: Mutex::new(header.first_node),
            record_count: AtomicU64::new(header.record_count),
            locks,
            config,
        })
    }

    pub fn header_position(&self) -> Position {
        self.header_position
    }

    /// Live record count. Mirrored to disk after the atomic update; a
    /// crash between the two can leave the persisted count stale.
    pub fn len(&self) -> u64 {
        self.record_count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn digits(&self, key: &[u8]) -> DigitPath {
        hash_digits(key_hash(key), self.config.load_factor)
    }

    fn write_header(&self) -> Result<()> {
        let header = MapHeader {
            first_node: *self.first_node.lock(),
            record_count: self.record_count.load(Ordering::Acquire),
        };
        self.store.write(self.header_position, &header.encode())
    }

    /// Root node position, allocating it on first insert.
    fn ensure_root(&self) -> Result<Position> {
        let mut first = self.first_node.lock();
        if first.is_null() {
            let root = self.tree.allocate_node()?;
            *first = root.position;
            drop(first);
            self.write_header()?;
            return Ok(root.position);
        }
        Ok(*first)
    }

    fn find_in_chain(
        &self,
        head: Position,
        key: &[u8],
    ) -> Result<(Option<RecordReference>, Option<RecordReference>)> {
        let mut parent = None;
        let mut cursor = head;
        while !cursor.is_null() {
            let reference = self.records.read_ref(cursor)?;
            let stored_key = self.records.read_key(&reference)?;
            if self.comparer.eq(&stored_key, key) {
                return Ok((parent, Some(reference)));
            }
            cursor = reference.next;
            parent = Some(reference);
        }
        Ok((parent, None))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_with(key, value, crate::serializer::SERIALIZER_RAW)
    }

    pub fn put_with(&self, key: &[u8], value: &[u8], serializer_id: u32) -> Result<()> {
        if key.is_empty() {
            return Err(StrataError::InvalidArgument("empty key".into()));
        }
        self.registry.check(serializer_id)?;
        let digits = self.digits(key);
        let _guard = self.locks.write(digits[0] as usize)?;

        let root = self.ensure_root()?;
        let node = self
            .tree
            .seek(root, &digits, true)?
            .expect("insert seek always yields a node");
        let chain_head = node.children[RESERVED_SLOT];
        let (parent, found) = self.find_in_chain(chain_head, key)?;

        match found {
            Some(mut existing) => {
                if value.len() as u32 <= existing.value_size() {
                    self.store.write(existing.value_position(), value)?;
                    if value.len() as u32 != existing.value_size() {
                        existing.record_size = existing.key_size + value.len() as u32;
                        existing.serializer_id = serializer_id;
                        self.records.write_ref(&existing)?;
                    } else if existing.serializer_id != serializer_id {
                        existing.serializer_id = serializer_id;
                        self.records.write_ref(&existing)?;
                    }
                } else {
                    // Grew past the slot: relocate and relink the chain.
                    let replacement =
                        self.records
                            .create_record(key, value, serializer_id, existing.next)?;
                    match parent {
                        Some(mut parent) => {
                            parent.next = replacement.position;
                            self.records.write_ref(&parent)?;
                        }
                        None => {
                            self.tree
                                .link_slot(node.position, RESERVED_SLOT, replacement.position)?;
                        }
                    }
                    self.records.forget(existing.position);
                    if self.config.dealloc {
                        self.store.deallocate(existing.position, existing.slot_size())?;
                    }
                }
            }
            None => {
                let fresh = self
                    .records
                    .create_record(key, value, serializer_id, Position::NULL)?;
                match parent {
                    // Chain continuation off the current tail.
                    Some(mut tail) => {
                        tail.next = fresh.position;
                        self.records.write_ref(&tail)?;
                    }
                    None => {
                        self.tree
                            .link_slot(node.position, RESERVED_SLOT, fresh.position)?;
                    }
                }
                self.record_count.fetch_add(1, Ordering::AcqRel);
                self.write_header()?;
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Ok(None);
        }
        let digits = self.digits(key);
        let _guard = self.locks.read(digits[0] as usize)?;

        let root = *self.first_node.lock();
        if root.is_null() {
            return Ok(None);
        }
        let Some(node) = self.tree.seek(root, &digits, false)? else {
            return Ok(None);
        };
        let (_, found) = self.find_in_chain(node.children[RESERVED_SLOT], key)?;
        match found {
            Some(reference) => {
                self.registry.check(reference.serializer_id)?;
                Ok(Some(self.records.read_value(&reference)?))
            }
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        let digits = self.digits(key);
        let _guard = self.locks.write(digits[0] as usize)?;

        let root = *self.first_node.lock();
        if root.is_null() {
            return Ok(false);
        }
        let Some(node) = self.tree.seek(root, &digits, false)? else {
            return Ok(false);
        };
        let (parent, found) = self.find_in_chain(node.children[RESERVED_SLOT], key)?;
        let Some(existing) = found else {
            return Ok(false);
        };

        match parent {
            Some(mut parent) => {
                parent.next = existing.next;
                self.records.write_ref(&parent)?;
            }
            None => {
                self.tree
                    .link_slot(node.position, RESERVED_SLOT, existing.next)?;
            }
        }
        self.records.forget(existing.position);
        if self.config.dealloc {
            self.store
                .deallocate(existing.position, existing.slot_size())?;
        }
        self.record_count.fetch_sub(1, Ordering::AcqRel);
        self.write_header()?;
        Ok(true)
    }

    /// Persists the header and flushes the store.
    pub fn flush(&self) -> Result<()> {
        self.write_header()?;
        self.store.flush()
    }

    /// Drops node and record caches; subsequent reads fall back to the
    /// store.
    pub fn clear_caches(&self) {
        self.tree.clear_cache();
        self.records.clear_cache();
    }
}
