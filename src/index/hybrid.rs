//! Hybrid combined map: a radix bitmap tree truncated at the load
//! factor, with one skip list per terminal bucket.
//!
//! The shallow radix walk bounds on-disk index overhead; the per-bucket
//! skip lists keep keys ordered so range queries stay possible. A bucket
//! is addressed by the key hash's digit path: all but the last digit walk
//! child nodes, the last digit indexes the terminal node's slot holding
//! the bucket's skip-list head. When a mutation promotes or demotes that
//! head, the owning slot is rewritten to the new head position.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::PressureCache;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::index::bitmap::{RadixTree, DIGIT_SLOTS};
use crate::index::skiplist::SkipListEngine;
use crate::index::{hash_digits, key_hash, DigitPath, MapOptions};
use crate::record::{MapHeader, SkipNode, MAP_HEADER_SIZE, RADIX};
use crate::serializer::{
    decode_json, encode_json, SerializerRegistry, SERIALIZER_JSON, SERIALIZER_RAW,
};
use crate::store::{Position, Store};

/// Resolved bucket context for one operation: the skip-list head plus
/// the bitmap slot that owns it. Built per call and passed explicitly so
/// no head state is shared between concurrent bucket operations.
struct BucketHandle {
    head: SkipNode,
    owner: Position,
    slot: usize,
}

/// Disk-resident key-ordered map.
///
/// Keys and values are byte buffers; each value carries a serializer id
/// from the registered set so the upper layer can decode versioned
/// payloads. Operations on the same key serialize through the key's
/// top-level bucket lock; operations on different top-level buckets
/// proceed concurrently.
pub struct HybridMap {
    store: Arc<dyn Store>,
    config: Config,
    registry: SerializerRegistry,
    tree: RadixTree,
    skiplist: SkipListEngine,
    values: PressureCache<Vec<u8>>,
    header_position: Position,
    first_node: Mutex<Position>,
    record_count: AtomicU64,
    locks: crate::lock::LevelLock,
}

impl HybridMap {
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

    /// Opens the map recorded as the store root, creating it (and
    /// recording it) on first use.
    pub fn open_or_create(store: Arc<dyn Store>, config: Config) -> Result<Self> {
        let root = store.root()?;
        if root.is_null() {
            let map = Self::create(Arc::clone(&store), config)?;
            store.set_root(map.header_position)?;
            Ok(map)
        } else {
            Self::open(store, root, config)
        }
    }

    fn build(
        store: Arc<dyn Store>,
        header_position: Position,
        header: MapHeader,
        config: Config,
        options: MapOptions,
    ) -> Result<Self> {
        let locks = if options.detached {
            crate::lock::LevelLock::noop()
        } else {
            crate::lock::LevelLock::new(RADIX, config.lock_timeout)
        };
        Ok(Self {
            tree: RadixTree::new(Arc::clone(&store), config.node_cache_size),
            skiplist: SkipListEngine::new(
                Arc::clone(&store),
                config.skip_node_cache_size,
                Arc::clone(&options.comparer),
                config.dealloc,
                options.rng_seed,
            ),
            values: PressureCache::new(config.value_cache_budget),
            store,
            registry: options.registry,
            header_position,
            first_node: Mutex::new(header.first_node),
            record_count: AtomicU64::new(header.record_count),
            locks,
            config,
        })
    }

    /// Position of this map's header, for the owning layer to persist.
    pub fn header_position(&self) -> Position {
        self.header_position
    }

    /// Live entry count. The disk mirror is written after the atomic
    /// update; a crash between the two leaves the persisted count stale
    /// until [`HybridMap::verify_count`] recomputes it.
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

    /// Resolves the bucket for a digit path, creating the path and the
    /// bucket's skip-list head when `create` is set.
    fn resolve_bucket(&self, digits: &[u8], create: bool) -> Result<Option<BucketHandle>> {
        let root = if create {
            self.ensure_root()?
        } else {
            let first = *self.first_node.lock();
            if first.is_null() {
                return Ok(None);
            }
            first
        };

        let hops = &digits[..digits.len() - 1];
        let Some(node) = self.tree.seek(root, hops, create)? else {
            return Ok(None);
        };
        let slot = digits[digits.len() - 1] as usize;
        let head_position = node.children[slot];

        let head = if head_position.is_null() {
            if !create {
                return Ok(None);
            }
            let head = self.skiplist.create_head()?;
            self.tree.link_slot(node.position, slot, head.position)?;
            debug!(
                owner = node.position.0,
                slot,
                head = head.position.0,
                "bucket skip list created"
            );
            head
        } else {
            self.skiplist.read_node(head_position)?
        };

        Ok(Some(BucketHandle {
            head,
            owner: node.position,
            slot,
        }))
    }

    /// Inserts or updates `key` with a raw byte value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_with(key, value, SERIALIZER_RAW)
    }

    /// Inserts or updates `key`, recording `serializer_id` for decode.
    pub fn put_with(&self, key: &[u8], value: &[u8], serializer_id: u32) -> Result<()> {
        if key.is_empty() {
            return Err(StrataError::InvalidArgument("empty key".into()));
        }
        self.registry.check(serializer_id)?;
        let digits = self.digits(key);
        let _guard = self.locks.write(digits[0] as usize)?;

        let bucket = self
            .resolve_bucket(&digits, true)?
            .expect("insert resolve always yields a bucket");
        let outcome = self.skiplist.put(&bucket.head, key, value, serializer_id)?;

        if outcome.head.position != bucket.head.position {
            self.tree
                .link_slot(bucket.owner, bucket.slot, outcome.head.position)?;
            debug!(
                bucket = bucket.owner.0,
                slot = bucket.slot,
                head = outcome.head.position.0,
                "bucket head moved"
            );
        }
        if !outcome.node.record_position.is_null() {
            self.values
                .insert(outcome.node.record_position, value.to_vec(), value.len() as u64);
        }
        if outcome.inserted {
            self.record_count.fetch_add(1, Ordering::AcqRel);
            self.write_header()?;
        }
        Ok(())
    }

    /// Inserts or updates `key` with a JSON-encoded value.
    pub fn put_typed<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        self.put_with(key, &encode_json(value)?, SERIALIZER_JSON)
    }

    /// Value bytes for `key`, `None` when absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with(key)?.map(|(bytes, _)| bytes))
    }

    /// Value bytes plus the serializer id they were written with.
    pub fn get_with(&self, key: &[u8]) -> Result<Option<(Vec<u8>, u32)>> {
        if key.is_empty() {
            return Ok(None);
        }
        let digits = self.digits(key);
        let _guard = self.locks.read(digits[0] as usize)?;

        let Some(bucket) = self.resolve_bucket(&digits, false)? else {
            return Ok(None);
        };
        let Some(node) = self.skiplist.get(&bucket.head, key)? else {
            return Ok(None);
        };
        self.registry.check(node.serializer_id)?;

        if node.record_size == 0 {
            return Ok(Some((Vec::new(), node.serializer_id)));
        }
        if let Some(bytes) = self.values.get(node.record_position) {
            return Ok(Some((bytes, node.serializer_id)));
        }
        let bytes = self.skiplist.read_value(&node)?;
        self.values
            .insert(node.record_position, bytes.clone(), bytes.len() as u64);
        Ok(Some((bytes, node.serializer_id)))
    }

    /// Decodes the JSON value stored at `key`.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get_with(key)? {
            Some((bytes, SERIALIZER_JSON)) => Ok(Some(decode_json(&bytes)?)),
            Some((_, other)) => Err(StrataError::Serialization(format!(
                "value written with serializer {other}, not json"
            ))),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        let digits = self.digits(key);
        let _guard = self.locks.read(digits[0] as usize)?;
        let Some(bucket) = self.resolve_bucket(&digits, false)? else {
            return Ok(false);
        };
        self.skiplist.contains_key(&bucket.head, key)
    }

    /// Removes `key`. Returns whether an entry existed; removing an
    /// absent key changes nothing.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        let digits = self.digits(key);
        let _guard = self.locks.write(digits[0] as usize)?;

        let Some(bucket) = self.resolve_bucket(&digits, false)? else {
            return Ok(false);
        };
        let outcome = self.skiplist.remove(&bucket.head, key)?;
        let Some((record_position, _)) = outcome.removed else {
            return Ok(false);
        };

        if outcome.head.position != bucket.head.position {
            self.tree
                .link_slot(bucket.owner, bucket.slot, outcome.head.position)?;
        }
        if !record_position.is_null() {
            self.values.remove(record_position);
        }
        self.record_count.fetch_sub(1, Ordering::AcqRel);
        self.write_header()?;
        Ok(true)
    }

    /// Keys at or above `key`, aggregated across every bucket. Keys
    /// ascend within one bucket; no order holds across buckets.
    pub fn above(&self, key: &[u8], inclusive: bool) -> Result<Vec<Vec<u8>>> {
        self.range_scan(key, inclusive, true)
    }

    /// Keys at or below `key`, aggregated across every bucket.
    pub fn below(&self, key: &[u8], inclusive: bool) -> Result<Vec<Vec<u8>>> {
        self.range_scan(key, inclusive, false)
    }

    fn range_scan(&self, key: &[u8], inclusive: bool, upward: bool) -> Result<Vec<Vec<u8>>> {
        let root = *self.first_node.lock();
        if root.is_null() {
            return Ok(Vec::new());
        }
        let hops = self.config.load_factor - 1;
        let mut out = Vec::new();
        for digit in 0..RADIX as u8 {
            let _guard = self.locks.read(digit as usize)?;
            for head_position in
                self.tree
                    .collect_buckets(root, hops, DIGIT_SLOTS, Some(digit))?
            {
                let head = self.skiplist.read_node(head_position)?;
                let nodes = if upward {
                    self.skiplist.above(&head, key, inclusive)?
                } else {
                    self.skiplist.below(&head, key, inclusive)?
                };
                out.extend(nodes.into_iter().map(|node| node.key));
            }
        }
        Ok(out)
    }

    /// Streams every entry, bucket by bucket, ascending within each
    /// bucket. The iterator holds no locks: entries added or removed
    /// while it runs may or may not be observed.
    pub fn iter(&self) -> Result<Iter<'_>> {
        let root = *self.first_node.lock();
        let mut buckets = VecDeque::new();
        if !root.is_null() {
            let hops = self.config.load_factor - 1;
            for digit in 0..RADIX as u8 {
                let _guard = self.locks.read(digit as usize)?;
                buckets.extend(
                    self.tree
                        .collect_buckets(root, hops, DIGIT_SLOTS, Some(digit))?,
                );
            }
        }
        Ok(Iter {
            map: self,
            buckets,
            cursor: Position::NULL,
        })
    }

    /// Recounts live entries by walking every bucket, for recovery after
    /// a crash desynchronized the persisted count.
    pub fn verify_count(&self) -> Result<u64> {
        let root = *self.first_node.lock();
        if root.is_null() {
            return Ok(0);
        }
        let hops = self.config.load_factor - 1;
        let mut count = 0u64;
        for digit in 0..RADIX as u8 {
            let _guard = self.locks.read(digit as usize)?;
            for head_position in
                self.tree
                    .collect_buckets(root, hops, DIGIT_SLOTS, Some(digit))?
            {
                let head = self.skiplist.read_node(head_position)?;
                let bottom = self.skiplist.bottom_head(&head)?;
                let mut cursor = bottom.next;
                while !cursor.is_null() {
                    count += 1;
                    cursor = self.skiplist.read_node(cursor)?.next;
                }
            }
        }
        Ok(count)
    }

    /// Persists the header and flushes the store.
    pub fn flush(&self) -> Result<()> {
        self.write_header()?;
        self.store.flush()
    }

    /// Drops every cache; subsequent reads fall back to the store.
    pub fn clear_caches(&self) {
        self.tree.clear_cache();
        self.skiplist.clear_cache();
        self.values.clear();
    }
}

/// Streaming iterator over a [`HybridMap`]'s entries.
pub struct Iter<'a> {
    map: &'a HybridMap,
    buckets: VecDeque<Position>,
    cursor: Position,
}

impl Iter<'_> {
    fn enter_bucket(&mut self, head_position: Position) -> Result<Position> {
        let head = self.map.skiplist.read_node(head_position)?;
        let bottom = self.map.skiplist.bottom_head(&head)?;
        Ok(bottom.next)
    }
}

impl Iterator for Iter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor.is_null() {
                let head_position = self.buckets.pop_front()?;
                match self.enter_bucket(head_position) {
                    Ok(first) => {
                        self.cursor = first;
                        continue;
                    }
                    Err(err) => return Some(Err(err)),
                }
            }
            let result = self
                .map
                .skiplist
                .read_node(self.cursor)
                .and_then(|node| {
                    let value = self.map.skiplist.read_value(&node)?;
                    Ok((node, value))
                });
            match result {
                Ok((node, value)) => {
                    self.cursor = node.next;
                    return Some(Ok((node.key, value)));
                }
                Err(err) => {
                    self.cursor = Position::NULL;
                    return Some(Err(err));
                }
            }
        }
    }
}
