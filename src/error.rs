use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors surfaced by the index engine.
///
/// Key absence is not an error: lookups return `Ok(None)` and removals
/// return `Ok(false)` for missing keys. Everything here indicates a real
/// failure the caller must be able to distinguish from "not found".
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("timed out waiting for level lock {0}")]
    LockTimeout(usize),
}
