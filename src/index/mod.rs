//! Index engines: the radix bitmap tree, the per-bucket skip list, and
//! the hybrid map composing the two.

use std::cmp::Ordering;
use std::sync::Arc;

use smallvec::SmallVec;
use xxhash_rust::xxh64::xxh64;

use crate::config::MAX_LOAD_FACTOR;
use crate::serializer::SerializerRegistry;

pub mod bitmap;
pub mod hybrid;
pub(crate) mod skiplist;

pub use bitmap::BitmapMap;
pub use hybrid::HybridMap;

/// Compares encoded keys.
///
/// `eq` drives collision-chain lookups; `cmp` orders keys inside a
/// bucket's skip list. The two must agree: `cmp == Equal` iff `eq`.
pub trait KeyComparer: Send + Sync {
    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering;

    fn eq(&self, a: &[u8], b: &[u8]) -> bool {
        self.cmp(a, b) == Ordering::Equal
    }
}

/// Byte-wise lexicographic ordering, the default total order over
/// encoded keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalComparer;

impl KeyComparer for LexicalComparer {
    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Pluggable pieces of a map beyond [`crate::config::Config`].
#[derive(Clone)]
pub struct MapOptions {
    /// Key equality/ordering predicate.
    pub comparer: Arc<dyn KeyComparer>,
    /// Registered value codecs.
    pub registry: SerializerRegistry,
    /// Detached maps skip level locking entirely (externally
    /// synchronized or single-threaded).
    pub detached: bool,
    /// Seed for the skip-list coin toss; `None` seeds from entropy.
    /// Fixing it makes index shapes reproducible for tooling and tests.
    pub rng_seed: Option<u64>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            comparer: Arc::new(LexicalComparer),
            registry: SerializerRegistry::new(),
            detached: false,
            rng_seed: None,
        }
    }
}

const HASH_SEED: u64 = 0x5ebe_c0de_0015_7a7a;

/// Digit path through the radix tree, most-significant first.
pub(crate) type DigitPath = SmallVec<[u8; MAX_LOAD_FACTOR]>;

pub(crate) fn key_hash(key: &[u8]) -> u64 {
    xxh64(key, HASH_SEED)
}

/// Base-10 digits of `hash`, most-significant first, exactly `count`
/// digits (leading zeros included).
pub(crate) fn hash_digits(hash: u64, count: usize) -> DigitPath {
    let mut digits = DigitPath::new();
    for i in (0..count).rev() {
        let divisor = 10u64.pow(i as u32);
        digits.push(((hash / divisor) % 10) as u8);
    }
    digits
}
