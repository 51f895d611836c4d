//! Key score table.
//!
//! A key's score is the byte length of the value most recently stored for
//! it, or a configured floor when nothing is known. Entries expire at their
//! store-time expiry and stop being visible to lookups immediately; a
//! background sweeper reclaims the memory later.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rand::Rng;
use tracing::debug;

use crate::shard::Sharded;

/// Expiration times above this value (in seconds) are absolute unix
/// timestamps; positive values at or below it are durations relative to the
/// store time.
pub const MAX_RELATIVE_EXPIRY: i64 = 60 * 60 * 24 * 30;

/// A score giver for any key.
pub trait KeyScorer: Send + Sync {
    /// Record `bytes` for `key`, expiring at `exptime` (0 = never; relative
    /// durations are rewritten to absolute).
    fn set_score(&self, key: &str, bytes: u64, exptime: i64);

    /// Forget the given keys.
    fn del_scores(&self, keys: &[&str]);

    /// The stored byte length, or the configured floor when the key is
    /// unknown or expired.
    fn get_score(&self, key: &str) -> u64;
}

#[derive(Debug, Clone, Copy)]
struct ScoreEntry {
    bytes: u64,
    exptime: i64,
}

impl ScoreEntry {
    fn live_at(&self, now: i64) -> bool {
        self.exptime == 0 || self.exptime > now
    }
}

/// A write-sharded score table with per-shard sweepers.
pub struct ShardedScorer {
    min_bytes: u64,
    shards: Sharded<RwLock<HashMap<String, ScoreEntry>>>,
}

impl ShardedScorer {
    pub fn new(buckets: usize, min_bytes: u64) -> Self {
        Self {
            min_bytes,
            shards: Sharded::new(buckets, || RwLock::new(HashMap::new())),
        }
    }

    /// Spawn one sweeper task per shard.
    ///
    /// Each sweeper starts at a random phase within `interval` so the shards
    /// never sweep in lockstep.
    pub fn start_sweepers(self: &Arc<Self>, interval: Duration) {
        for index in 0..self.shards.len() {
            let scorer = self.clone();
            let phase = rand::thread_rng().gen_range(0..interval.as_millis().max(1) as u64);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(phase)).await;
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let expired = scorer.collect_expired(index);
                    if !expired.is_empty() {
                        debug!(shard = index, count = expired.len(), "sweeping expired scores");
                        let keys: Vec<&str> = expired.iter().map(String::as_str).collect();
                        scorer.delete_in_shard(index, &keys);
                    }
                }
            });
        }
    }

    /// Walk one shard under its read lock and collect the expired keys.
    fn collect_expired(&self, index: usize) -> Vec<String> {
        let now = unix_now();
        let entries = self.shards.get(index).read();
        entries
            .iter()
            .filter(|(_, entry)| entry.exptime > 0 && entry.exptime <= now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn delete_in_shard(&self, index: usize, keys: &[&str]) {
        let mut entries = self.shards.get(index).write();
        for key in keys {
            entries.remove(*key);
        }
    }

    #[cfg(test)]
    fn holds_entry(&self, key: &str) -> bool {
        self.shards.pick(key.as_bytes()).read().contains_key(key)
    }
}

impl KeyScorer for ShardedScorer {
    fn set_score(&self, key: &str, bytes: u64, exptime: i64) {
        let exptime = normalize_exptime(exptime, unix_now());
        let mut entries = self.shards.pick(key.as_bytes()).write();
        entries.insert(key.to_string(), ScoreEntry { bytes, exptime });
    }

    fn del_scores(&self, keys: &[&str]) {
        // Group by shard so each lock is taken once.
        let mut groups: HashMap<usize, Vec<&str>> = HashMap::new();
        for key in keys {
            groups
                .entry(self.shards.index_of(key.as_bytes()))
                .or_default()
                .push(key);
        }
        for (index, keys) in groups {
            self.delete_in_shard(index, &keys);
        }
    }

    fn get_score(&self, key: &str) -> u64 {
        let now = unix_now();
        let entries = self.shards.pick(key.as_bytes()).read();
        match entries.get(key) {
            Some(entry) if entry.live_at(now) => entry.bytes,
            _ => self.min_bytes,
        }
    }
}

/// Rewrite a relative expiry to an absolute unix timestamp.
fn normalize_exptime(exptime: i64, now: i64) -> i64 {
    if exptime > 0 && exptime <= MAX_RELATIVE_EXPIRY {
        now + exptime
    } else {
        exptime
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
