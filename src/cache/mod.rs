//! Position-keyed caches.
//!
//! Two shapes: a bounded LRU for decoded nodes, and a byte-budget
//! pressure cache for value payloads. Both are transparent: eviction can
//! never change an observable result, because every miss falls through to
//! the store.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::store::Position;

/// Fraction of the byte budget where per-insert eviction starts.
const LOW_WATERMARK: f64 = 0.70;

/// Fraction of the byte budget where the cache clears outright.
const HIGH_WATERMARK: f64 = 0.90;

/// Entries evicted per background batch.
const EVICTION_BATCH: usize = 10_000;

/// Bounded LRU keyed by store position.
pub struct PositionCache<T: Clone> {
    inner: Mutex<LruCache<Position, T>>,
}

impl<T: Clone> PositionCache<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1024).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, position: Position) -> Option<T> {
        self.inner.lock().get(&position).cloned()
    }

    pub fn put(&self, position: Position, value: T) {
        self.inner.lock().put(position, value);
    }

    pub fn pop(&self, position: Position) {
        self.inner.lock().pop(&position);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Sent on the notification channel when an insert crosses the low
// watermark; the evictor thread exits when every sender is gone.
struct ThresholdExceeded;

struct Entry<T> {
    value: T,
    bytes: u64,
}

struct State<T> {
    entries: HashMap<Position, Entry<T>>,
    // Insertion order; may hold stale positions after removals.
    order: VecDeque<Position>,
    used: u64,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    budget: u64,
    evictions: AtomicU64,
}

impl<T> Shared<T> {
    fn evict_oldest(state: &mut State<T>) -> bool {
        while let Some(position) = state.order.pop_front() {
            if let Some(entry) = state.entries.remove(&position) {
                state.used -= entry.bytes;
                return true;
            }
        }
        false
    }
}

/// Byte-budget eviction cache.
///
/// Below 70% of the budget inserts proceed freely. Between 70% and 90%
/// each insert first evicts the oldest entry and notifies the background
/// evictor, which trims a batch independent of the calling thread. At 90%
/// the cache clears outright.
pub struct PressureCache<T> {
    shared: Arc<Shared<T>>,
    sender: Option<Sender<ThresholdExceeded>>,
    evictor: Option<thread::JoinHandle<()>>,
}

impl<T: Send + 'static> PressureCache<T> {
    /// Creates a cache with the given byte budget. A zero budget disables
    /// caching: every insert is dropped and every get misses.
    pub fn new(budget: u64) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                entries: HashMap::new(),
                order: VecDeque::new(),
                used: 0,
            }),
            budget,
            evictions: AtomicU64::new(0),
        });
        let (sender, receiver) = mpsc::channel();
        let evictor = thread::spawn({
            let shared = Arc::clone(&shared);
            move || Self::evictor_loop(shared, receiver)
        });
        Self {
            shared,
            sender: Some(sender),
            evictor: Some(evictor),
        }
    }

    fn evictor_loop(shared: Arc<Shared<T>>, receiver: Receiver<ThresholdExceeded>) {
        let low = (shared.budget as f64 * LOW_WATERMARK) as u64;
        while receiver.recv().is_ok() {
            // Coalesce a burst of notifications into one pass.
            while receiver.try_recv().is_ok() {}
            let mut state = shared.state.lock();
            let mut evicted = 0usize;
            while state.used > low && evicted < EVICTION_BATCH {
                if !Shared::evict_oldest(&mut state) {
                    break;
                }
                evicted += 1;
            }
            if evicted > 0 {
                shared.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                debug!(evicted, used = state.used, "pressure batch eviction");
            }
        }
    }

    pub fn insert(&self, position: Position, value: T, bytes: u64) {
        if self.shared.budget == 0 {
            return;
        }
        let high = (self.shared.budget as f64 * HIGH_WATERMARK) as u64;
        let low = (self.shared.budget as f64 * LOW_WATERMARK) as u64;

        let mut state = self.shared.state.lock();
        if state.used + bytes >= high {
            let dropped = state.entries.len();
            state.entries.clear();
            state.order.clear();
            state.used = 0;
            self.shared
                .evictions
                .fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(dropped, "pressure cache cleared at high watermark");
        } else if state.used >= low {
            if Shared::evict_oldest(&mut state) {
                self.shared.evictions.fetch_add(1, Ordering::Relaxed);
            }
            if let Some(sender) = &self.sender {
                let _ = sender.send(ThresholdExceeded);
            }
        }

        if let Some(old) = state.entries.insert(position, Entry { value, bytes }) {
            state.used -= old.bytes;
        } else {
            state.order.push_back(position);
        }
        state.used += bytes;
    }

    pub fn get(&self, position: Position) -> Option<T>
    where
        T: Clone,
    {
        self.shared
            .state
            .lock()
            .entries
            .get(&position)
            .map(|entry| entry.value.clone())
    }

    pub fn remove(&self, position: Position) {
        let mut state = self.shared.state.lock();
        if let Some(entry) = state.entries.remove(&position) {
            state.used -= entry.bytes;
        }
    }

    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.entries.clear();
        state.order.clear();
        state.used = 0;
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> u64 {
        self.shared.state.lock().used
    }

    /// Total entries evicted by watermark pressure, either inline or by
    /// the background batch.
    pub fn evictions(&self) -> u64 {
        self.shared.evictions.load(Ordering::Relaxed)
    }
}

impl<T> Drop for PressureCache<T> {
    fn drop(&mut self) {
        // Disconnecting the channel ends the evictor loop.
        drop(self.sender.take());
        if let Some(handle) = self.evictor.take() {
            let _ = handle.join();
        }
    }
}
