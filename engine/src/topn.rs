//! Top-N selection.
//!
//! Aggregate counts are filtered by a minimum-request threshold, weighted by
//! the scorer (count x stored-value bytes), and cut down to the N highest
//! entries with a max-heap. Counts and scores are unsigned 64-bit with
//! wrap-around arithmetic; a minute of traffic stays far from the edge.

use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use crate::scorer::KeyScorer;

/// A key and its weighted score, ordered by score for heap selection.
///
/// Serializes as `{"Key": ..., "Score": ...}`, the shape of the aggregated
/// report payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotKeyEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Score")]
    pub score: u64,
}

impl PartialEq for HotKeyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for HotKeyEntry {}

impl PartialOrd for HotKeyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HotKeyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score.cmp(&other.score)
    }
}

/// Select the top `n` keys from `counts`.
///
/// Entries below `threshold` are dropped; survivors are weighted by
/// `count * scorer.get_score(key)`. When more than `n` survive, a max-heap
/// built in O(m) yields the winners in O(n log m). Ties between equal
/// scores resolve in heap order and are not stable across runs.
pub fn top_n(
    scorer: &dyn KeyScorer,
    counts: HashMap<String, u64>,
    n: usize,
    threshold: u64,
) -> HashMap<String, u64> {
    let mut survivors = HashMap::with_capacity(counts.len().min(64));
    let mut entries = Vec::with_capacity(counts.len());
    for (key, count) in counts {
        if count < threshold {
            continue;
        }
        let weighted = count.wrapping_mul(scorer.get_score(&key));
        entries.push(HotKeyEntry {
            key: key.clone(),
            score: weighted,
        });
        survivors.insert(key, weighted);
    }

    if survivors.len() <= n {
        return survivors;
    }

    let mut heap = BinaryHeap::from(entries);
    let mut tops = HashMap::with_capacity(n);
    for _ in 0..n {
        let Some(entry) = heap.pop() else { break };
        tops.insert(entry.key, entry.score);
    }
    tops
}
