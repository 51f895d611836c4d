//! Per-key fetch counters with freeze-on-snapshot semantics.
//!
//! A counter is writable from creation until its first snapshot. The first
//! [`KeyCounter::snapshot`] aggregates all shards and freezes the counter;
//! later snapshots return the same map and later increments are discarded.
//! The frozen flag is an atomic checked without taking any shard lock, so
//! retired windows cost nothing on the hot path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::shard::Sharded;

/// A one-second bucket of per-key fetch counts.
pub trait KeyCounter: Send + Sync {
    /// Add `delta` to `key`. Discarded once the counter is frozen.
    fn increment(&self, key: &str, delta: u64);

    /// Freeze the counter and return its aggregated counts.
    ///
    /// The first call performs the aggregation; every call returns the same
    /// map.
    fn snapshot(&self) -> Arc<HashMap<String, u64>>;
}

/// A counter that ignores increments and always snapshots empty.
///
/// Fills the ring slots that have never been written.
pub struct EmptyCounter {
    empty: Arc<HashMap<String, u64>>,
}

impl EmptyCounter {
    pub fn new() -> Self {
        Self {
            empty: Arc::new(HashMap::new()),
        }
    }
}

impl Default for EmptyCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCounter for EmptyCounter {
    fn increment(&self, _key: &str, _delta: u64) {}

    fn snapshot(&self) -> Arc<HashMap<String, u64>> {
        self.empty.clone()
    }
}

/// A write-sharded counter.
///
/// Increments route to `fnv1a(key) % buckets`; each shard is a plain
/// mutex-guarded map.
pub struct ShardedCounter {
    frozen: AtomicBool,
    shards: Sharded<Mutex<HashMap<String, u64>>>,
    snapshot: OnceLock<Arc<HashMap<String, u64>>>,
}

impl ShardedCounter {
    pub fn new(buckets: usize) -> Self {
        Self {
            frozen: AtomicBool::new(false),
            shards: Sharded::new(buckets, || Mutex::new(HashMap::new())),
            snapshot: OnceLock::new(),
        }
    }
}

impl KeyCounter for ShardedCounter {
    fn increment(&self, key: &str, delta: u64) {
        if self.frozen.load(Ordering::Acquire) {
            return;
        }
        let mut counts = self.shards.pick(key.as_bytes()).lock();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count = count.wrapping_add(delta);
    }

    fn snapshot(&self) -> Arc<HashMap<String, u64>> {
        self.snapshot
            .get_or_init(|| {
                // Stop writers first so the collection below settles.
                self.frozen.store(true, Ordering::Release);
                let mut aggregate = HashMap::new();
                for shard in self.shards.iter() {
                    for (key, count) in shard.lock().iter() {
                        // A key collides only within one shard; summing is a safety.
                        let total: &mut u64 = aggregate.entry(key.clone()).or_insert(0);
                        *total = total.wrapping_add(*count);
                    }
                }
                Arc::new(aggregate)
            })
            .clone()
    }
}
