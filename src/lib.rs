//! Strata: embedded, disk-resident index engine.
//!
//! A hybrid on-disk map: a truncated radix (bitmap-digit) tree fans out
//! over the key hash, and each terminal bucket owns a probabilistic skip
//! list that keeps its keys ordered. The combination bounds index
//! overhead while preserving ordered range queries, under concurrent
//! access guarded by per-bucket level locks.
//!
//! ```text
//!  put(key, value)
//!    │ hash(key) → digit path
//!    ▼
//!  ┌─────────────┐   digit    ┌─────────────┐   last digit
//!  │ BitmapNode  ├───────────▶│ BitmapNode  ├──────────────┐
//!  └─────────────┘            └─────────────┘              ▼
//!                                               ┌────────────────────┐
//!                                               │ bucket skip list   │
//!                                               │ (ordered, towered) │
//!                                               └────────────────────┘
//! ```
//!
//! Everything lives in a byte-addressable [`store::Store`]; the engine is
//! a library consumed by an upper persistence layer and exposes no
//! network or CLI surface.

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod lock;
pub mod record;
pub mod serializer;
pub mod store;

pub use config::Config;
pub use error::{Result, StrataError};
pub use index::{BitmapMap, HybridMap, KeyComparer, LexicalComparer, MapOptions};
pub use serializer::{SerializerRegistry, SERIALIZER_JSON, SERIALIZER_RAW};
pub use store::{FileStore, MemoryStore, Position, Store};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
