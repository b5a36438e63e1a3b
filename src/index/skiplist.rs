//! Disk-resident skip list, one per radix bucket.
//!
//! Tower representation: each key occupies one node per level it reaches,
//! `next` linking successors on a level and `down` linking the same key
//! one level lower. The head chain mirrors this with empty-key nodes; the
//! topmost head is the bucket's entry point, and its position is what the
//! owning bitmap slot stores. Insert levels come from a fair coin toss,
//! capped so a pathological toss run cannot build an unbounded tower.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::cache::PositionCache;
use crate::error::Result;
use crate::index::KeyComparer;
use crate::record::SkipNode;
use crate::store::{Position, Store};

/// Highest level a node can reach.
pub(crate) const MAX_LEVEL: i8 = 10;

/// Result of a `put`: the (possibly promoted) head, the bottom-level
/// node for the key, and whether a new entry was created.
pub(crate) struct SkipPut {
    pub head: SkipNode,
    pub node: SkipNode,
    pub inserted: bool,
}

/// Result of a `remove`: the (possibly demoted) head and the value slot
/// that was vacated, when a matching entry existed.
pub(crate) struct SkipRemove {
    pub head: SkipNode,
    pub removed: Option<(Position, u32)>,
}

pub(crate) struct SkipListEngine {
    store: Arc<dyn Store>,
    nodes: PositionCache<SkipNode>,
    comparer: Arc<dyn KeyComparer>,
    rng: Mutex<StdRng>,
    dealloc: bool,
}

impl SkipListEngine {
    pub fn new(
        store: Arc<dyn Store>,
        cache_size: usize,
        comparer: Arc<dyn KeyComparer>,
        dealloc: bool,
        rng_seed: Option<u64>,
    ) -> Self {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            nodes: PositionCache::new(cache_size),
            comparer,
            rng: Mutex::new(rng),
            dealloc,
        }
    }

    pub fn read_node(&self, position: Position) -> Result<SkipNode> {
        if let Some(node) = self.nodes.get(position) {
            return Ok(node);
        }
        let prefix = self.store.read(position, 4)?;
        let total = SkipNode::decode_size_prefix(&prefix)? as usize;
        let bytes = self.store.read(position, total)?;
        let node = SkipNode::decode(position, &bytes)?;
        self.nodes.put(position, node.clone());
        Ok(node)
    }

    fn write_node(&self, node: &SkipNode) -> Result<()> {
        self.store.write(node.position, &node.encode())?;
        self.nodes.put(node.position, node.clone());
        Ok(())
    }

    fn create_node(&self, mut node: SkipNode) -> Result<SkipNode> {
        node.position = self.store.allocate(node.encoded_size() as u64)?;
        self.write_node(&node)?;
        Ok(node)
    }

    /// Allocates a fresh level-0 head for an empty bucket.
    pub fn create_head(&self) -> Result<SkipNode> {
        self.create_node(SkipNode::head(Position::NULL, 0))
    }

    /// Drops every cached node, forcing subsequent reads back to the
    /// store.
    pub fn clear_cache(&self) {
        self.nodes.clear();
    }

    fn random_level(&self) -> i8 {
        let mut rng = self.rng.lock();
        let mut level = 0;
        while level < MAX_LEVEL && rng.gen::<bool>() {
            level += 1;
        }
        level
    }

    /// Rightmost node strictly before `key` on every level, bottom
    /// (level 0) first. Index `l` holds the level-`l` predecessor.
    fn find_path(&self, head_position: Position, key: &[u8]) -> Result<Vec<SkipNode>> {
        let mut path = Vec::new();
        let mut current = self.read_node(head_position)?;
        loop {
            loop {
                if current.next.is_null() {
                    break;
                }
                let successor = self.read_node(current.next)?;
                if self.comparer.cmp(&successor.key, key) == Ordering::Less {
                    current = successor;
                } else {
                    break;
                }
            }
            path.push(current.clone());
            if current.down.is_null() {
                break;
            }
            current = self.read_node(current.down)?;
        }
        path.reverse();
        Ok(path)
    }

    fn successor_match(&self, predecessor: &SkipNode, key: &[u8]) -> Result<Option<SkipNode>> {
        if predecessor.next.is_null() {
            return Ok(None);
        }
        let successor = self.read_node(predecessor.next)?;
        if self.comparer.eq(&successor.key, key) {
            Ok(Some(successor))
        } else {
            Ok(None)
        }
    }

    /// Bottom-level node for `key`, if present.
    pub fn get(&self, head: &SkipNode, key: &[u8]) -> Result<Option<SkipNode>> {
        let path = self.find_path(head.position, key)?;
        self.successor_match(&path[0], key)
    }

    pub fn contains_key(&self, head: &SkipNode, key: &[u8]) -> Result<bool> {
        Ok(self.get(head, key)?.is_some())
    }

    /// Reads the value payload a bottom-level node points at.
    pub fn read_value(&self, node: &SkipNode) -> Result<Vec<u8>> {
        if node.record_size == 0 {
            return Ok(Vec::new());
        }
        self.store.read(node.record_position, node.record_size as usize)
    }

    /// Writes `value`, reusing the existing slot when it still fits,
    /// relocating to a fresh allocation when the value grew.
    fn write_value(
        &self,
        old_position: Position,
        old_size: u32,
        value: &[u8],
    ) -> Result<(Position, u32)> {
        if value.is_empty() {
            if self.dealloc && !old_position.is_null() {
                self.store.deallocate(old_position, old_size as u64)?;
            }
            return Ok((Position::NULL, 0));
        }
        if !old_position.is_null() && value.len() as u32 <= old_size {
            self.store.write(old_position, value)?;
            return Ok((old_position, value.len() as u32));
        }
        let position = self.store.allocate(value.len() as u64)?;
        self.store.write(position, value)?;
        if !old_position.is_null() {
            if self.dealloc {
                self.store.deallocate(old_position, old_size as u64)?;
            } else {
                debug!(position = old_position.0, "record slot abandoned on growth");
            }
        }
        Ok((position, value.len() as u32))
    }

    pub fn put(
        &self,
        head: &SkipNode,
        key: &[u8],
        value: &[u8],
        serializer_id: u32,
    ) -> Result<SkipPut> {
        let path = self.find_path(head.position, key)?;

        if let Some(existing) = self.successor_match(&path[0], key)? {
            let record = self.write_value(existing.record_position, existing.record_size, value)?;
            let node = self.update_tower(&path, key, record, serializer_id)?;
            let head = self.read_node(head.position)?;
            return Ok(SkipPut {
                head,
                node,
                inserted: false,
            });
        }

        let record = self.write_value(Position::NULL, 0, value)?;
        let level = self.random_level();

        // Promote the head chain when the tossed level exceeds it.
        let old_top = path.len() as i8 - 1;
        let mut top_position = head.position;
        let mut new_heads = Vec::new();
        for l in (old_top + 1)..=level {
            let mut promoted = SkipNode::head(Position::NULL, l);
            promoted.down = top_position;
            let promoted = self.create_node(promoted)?;
            top_position = promoted.position;
            new_heads.push(promoted);
        }

        // Splice bottom-up so each level's `down` pointer is known.
        let mut below = Position::NULL;
        let mut bottom = None;
        for l in 0..=level {
            let mut predecessor = if (l as usize) < path.len() {
                path[l as usize].clone()
            } else {
                new_heads[(l - old_top - 1) as usize].clone()
            };
            let node = self.create_node(SkipNode {
                position: Position::NULL,
                key: key.to_vec(),
                record_position: record.0,
                record_size: record.1,
                level: l,
                next: predecessor.next,
                down: below,
                serializer_id,
            })?;
            predecessor.next = node.position;
            self.write_node(&predecessor)?;
            below = node.position;
            if l == 0 {
                bottom = Some(node);
            }
        }

        let head = self.read_node(top_position)?;
        Ok(SkipPut {
            head,
            node: bottom.expect("level 0 is always spliced"),
            inserted: true,
        })
    }

    /// Rewrites the record fields of every tower node for `key`, top to
    /// bottom, and returns the bottom node.
    fn update_tower(
        &self,
        path: &[SkipNode],
        key: &[u8],
        record: (Position, u32),
        serializer_id: u32,
    ) -> Result<SkipNode> {
        for l in (0..path.len()).rev() {
            if let Some(top_match) = self.successor_match(&path[l], key)? {
                let mut node = top_match;
                loop {
                    node.record_position = record.0;
                    node.record_size = record.1;
                    node.serializer_id = serializer_id;
                    self.write_node(&node)?;
                    if node.down.is_null() {
                        return Ok(node);
                    }
                    node = self.read_node(node.down)?;
                }
            }
        }
        unreachable!("update_tower called without a matching successor")
    }

    pub fn remove(&self, head: &SkipNode, key: &[u8]) -> Result<SkipRemove> {
        let path = self.find_path(head.position, key)?;
        if self.successor_match(&path[0], key)?.is_none() {
            return Ok(SkipRemove {
                head: head.clone(),
                removed: None,
            });
        }

        let mut removed = None;
        for l in (0..path.len()).rev() {
            if let Some(matched) = self.successor_match(&path[l], key)? {
                let mut predecessor = path[l].clone();
                predecessor.next = matched.next;
                self.write_node(&predecessor)?;
                self.nodes.pop(matched.position);
                if l == 0 {
                    removed = Some((matched.record_position, matched.record_size));
                }
            }
        }

        if let Some((position, size)) = removed {
            if self.dealloc && !position.is_null() {
                self.store.deallocate(position, size as u64)?;
            }
        }

        // Demote empty top levels so the bucket pointer tracks height.
        let mut current = self.read_node(head.position)?;
        while current.level > 0 && current.next.is_null() && !current.down.is_null() {
            current = self.read_node(current.down)?;
        }

        Ok(SkipRemove {
            head: current,
            removed,
        })
    }

    /// Level-0 head of the chain `head` tops.
    pub fn bottom_head(&self, head: &SkipNode) -> Result<SkipNode> {
        let mut current = self.read_node(head.position)?;
        while !current.down.is_null() {
            current = self.read_node(current.down)?;
        }
        Ok(current)
    }

    /// Bottom-level nodes with keys above `key`, ascending.
    pub fn above(&self, head: &SkipNode, key: &[u8], inclusive: bool) -> Result<Vec<SkipNode>> {
        let path = self.find_path(head.position, key)?;
        let mut out = Vec::new();
        let mut cursor = path[0].next;
        while !cursor.is_null() {
            let node = self.read_node(cursor)?;
            cursor = node.next;
            match self.comparer.cmp(&node.key, key) {
                Ordering::Greater => out.push(node),
                Ordering::Equal if inclusive => out.push(node),
                _ => {}
            }
        }
        Ok(out)
    }

    /// Bottom-level nodes with keys below `key`, ascending.
    pub fn below(&self, head: &SkipNode, key: &[u8], inclusive: bool) -> Result<Vec<SkipNode>> {
        let bottom = self.bottom_head(head)?;
        let mut out = Vec::new();
        let mut cursor = bottom.next;
        while !cursor.is_null() {
            let node = self.read_node(cursor)?;
            cursor = node.next;
            match self.comparer.cmp(&node.key, key) {
                Ordering::Less => out.push(node),
                Ordering::Equal if inclusive => out.push(node),
                _ => break,
            }
        }
        Ok(out)
    }
}
