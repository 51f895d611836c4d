//! Hot-key detection engine.
//!
//! The engine counts key fetches in one-second windows, scores keys by the
//! byte size of their most recently stored value, and combines the two into
//! a rolling top-N of the keys dominating cache load.
//!
//! Structure:
//!
//! - [`shard`]: FNV-1a keyed shard container used by the counter and scorer
//! - [`counter`]: freeze-on-snapshot per-key counters
//! - [`scorer`]: key -> (bytes, expiry) table with background sweeping
//! - [`window`]: the ring of W+1 counters with atomic roll-and-aggregate
//! - [`topn`]: threshold filter and heap-based top-N selection

pub mod counter;
pub mod scorer;
pub mod shard;
pub mod topn;
pub mod window;

pub use counter::{EmptyCounter, KeyCounter, ShardedCounter};
pub use scorer::{KeyScorer, MAX_RELATIVE_EXPIRY, ShardedScorer};
pub use topn::{HotKeyEntry, top_n};
pub use window::RollingWindows;
