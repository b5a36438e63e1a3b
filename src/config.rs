use std::time::Duration;

use crate::error::{Result, StrataError};

/// Number of radix levels before delegating to a per-bucket skip list.
pub const DEFAULT_LOAD_FACTOR: usize = 3;

/// Smallest and largest accepted load factors.
pub const MIN_LOAD_FACTOR: usize = 1;
pub const MAX_LOAD_FACTOR: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// Radix truncation depth; each level consumes one base-10 hash digit.
    pub load_factor: usize,
    /// Capacity of the bitmap-node cache, in entries.
    pub node_cache_size: usize,
    /// Capacity of the skip-node cache, in entries.
    pub skip_node_cache_size: usize,
    /// Byte budget for the value pressure cache.
    pub value_cache_budget: u64,
    /// Reclaim record slots on delete and growth-relocation.
    pub dealloc: bool,
    /// Bounded wait for level locks; `None` blocks indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            load_factor: DEFAULT_LOAD_FACTOR,
            node_cache_size: 4096,
            skip_node_cache_size: 16384,
            value_cache_budget: 64 * 1024 * 1024,
            dealloc: false,
            lock_timeout: None,
        }
    }
}

impl Config {
    /// Wide, shallow index: every bucket head stays cached, locks are
    /// coarse. Suited to maps with few distinct key prefixes.
    pub fn shallow() -> Self {
        Self {
            load_factor: 1,
            ..Self::default()
        }
    }

    /// Deep index with small buckets and finer lock granularity at the
    /// cost of more bitmap nodes on disk.
    pub fn deep() -> Self {
        Self {
            load_factor: 5,
            node_cache_size: 16384,
            ..Self::default()
        }
    }

    /// Space-frugal profile: reclaims slots eagerly and keeps small
    /// caches. Used by tooling that walks many maps at once.
    pub fn compact() -> Self {
        Self {
            node_cache_size: 512,
            skip_node_cache_size: 2048,
            value_cache_budget: 4 * 1024 * 1024,
            dealloc: true,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.load_factor < MIN_LOAD_FACTOR || self.load_factor > MAX_LOAD_FACTOR {
            return Err(StrataError::InvalidArgument(format!(
                "load factor {} outside {}..={}",
                self.load_factor, MIN_LOAD_FACTOR, MAX_LOAD_FACTOR
            )));
        }
        if self.node_cache_size == 0 || self.skip_node_cache_size == 0 {
            return Err(StrataError::InvalidArgument(
                "cache sizes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
