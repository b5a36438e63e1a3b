//! Per-bucket read-write locking.
//!
//! One lock per top-level digit: readers and writers of different
//! buckets never contend, while operations inside one bucket serialize.

use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, StrataError};

/// An array of independent read-write locks, one per top-level bucket.
///
/// The no-op variant backs detached sub-maps that are externally
/// synchronized or single-threaded; its guards are free to construct and
/// exclude nothing.
pub struct LevelLock {
    locks: Vec<RwLock<()>>,
    timeout: Option<Duration>,
}

/// Held read access to one bucket level.
pub struct LevelReadGuard<'a> {
    _guard: Option<RwLockReadGuard<'a, ()>>,
}

/// Held write access to one bucket level.
#[derive(Debug)]
pub struct LevelWriteGuard<'a> {
    _guard: Option<RwLockWriteGuard<'a, ()>>,
}

impl LevelLock {
    /// Creates `levels` independent locks. With a timeout, acquisition
    /// fails with [`StrataError::LockTimeout`] instead of blocking
    /// indefinitely.
    pub fn new(levels: usize, timeout: Option<Duration>) -> Self {
        Self {
            locks: (0..levels).map(|_| RwLock::new(())).collect(),
            timeout,
        }
    }

    /// A lock that excludes nothing.
    pub fn noop() -> Self {
        Self {
            locks: Vec::new(),
            timeout: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn read(&self, level: usize) -> Result<LevelReadGuard<'_>> {
        if self.locks.is_empty() {
            return Ok(LevelReadGuard { _guard: None });
        }
        let lock = self.lock_at(level)?;
        let guard = match self.timeout {
            Some(timeout) => lock
                .try_read_for(timeout)
                .ok_or(StrataError::LockTimeout(level))?,
            None => lock.read(),
        };
        Ok(LevelReadGuard {
            _guard: Some(guard),
        })
    }

    pub fn write(&self, level: usize) -> Result<LevelWriteGuard<'_>> {
        if self.locks.is_empty() {
            return Ok(LevelWriteGuard { _guard: None });
        }
        let lock = self.lock_at(level)?;
        let guard = match self.timeout {
            Some(timeout) => lock
                .try_write_for(timeout)
                .ok_or(StrataError::LockTimeout(level))?,
            None => lock.write(),
        };
        Ok(LevelWriteGuard {
            _guard: Some(guard),
        })
    }

    fn lock_at(&self, level: usize) -> Result<&RwLock<()>> {
        self.locks.get(level).ok_or_else(|| {
            StrataError::InvalidArgument(format!(
                "lock level {level} out of range 0..{}",
                self.locks.len()
            ))
        })
    }
}
