//! Rolling window ring.
//!
//! W+1 counters back a horizon of W one-second windows. Exactly one slot,
//! `current`, is writable; the others are frozen. The slice looks like
//!
//! ```text
//! [read_from ... read_to, current]
//!  <--     width     -->
//! ```
//!
//! and every [`RollingWindows::roll`] shifts all three marks right by one:
//! the slot at `read_from` is recycled into the next `current`, and the W
//! most recently closed windows (including the one just frozen) are
//! aggregated into the returned top-N.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::counter::{EmptyCounter, KeyCounter};
use crate::scorer::KeyScorer;
use crate::topn::top_n;

struct Ring {
    windows: Vec<Arc<dyn KeyCounter>>,
    current: usize,
    read_from: usize,
    read_to: usize,
}

/// The ring of counters plus the selection parameters applied on each roll.
pub struct RollingWindows {
    ring: RwLock<Ring>,
    scorer: Arc<dyn KeyScorer>,
    counter_factory: Box<dyn Fn() -> Arc<dyn KeyCounter> + Send + Sync>,
    width: usize,
    top_n: usize,
    threshold: u64,
}

impl RollingWindows {
    /// Build a ring of `width + 1` slots with a fresh writable `current` and
    /// empty closed windows.
    pub fn new(
        scorer: Arc<dyn KeyScorer>,
        counter_factory: impl Fn() -> Arc<dyn KeyCounter> + Send + Sync + 'static,
        width: usize,
        top_n: usize,
        threshold: u64,
    ) -> Self {
        let width = width.max(1);
        let mut windows: Vec<Arc<dyn KeyCounter>> = Vec::with_capacity(width + 1);
        for _ in 0..width {
            windows.push(Arc::new(EmptyCounter::new()));
        }
        windows.push(counter_factory());

        Self {
            ring: RwLock::new(Ring {
                windows,
                current: width,
                read_from: 0,
                read_to: width - 1,
            }),
            scorer,
            counter_factory: Box::new(counter_factory),
            width,
            top_n,
            threshold,
        }
    }

    /// The writable window.
    fn last(&self) -> Arc<dyn KeyCounter> {
        let ring = self.ring.read();
        ring.windows[ring.current].clone()
    }

    /// Count a fetch against the writable window.
    ///
    /// An increment racing a roll lands in whichever window `current`
    /// addressed when it was observed.
    pub fn increment(&self, key: &str, delta: u64) {
        self.last().increment(key, delta);
    }

    pub fn scorer(&self) -> &Arc<dyn KeyScorer> {
        &self.scorer
    }

    /// Rotate the ring and return the top-N over the closed windows.
    ///
    /// Under the exclusive lock: recycle the slot at `read_from` into a new
    /// writable counter, snapshot-and-sum the W most recently closed
    /// windows (the just-frozen one included), shift the marks, and select
    /// the top-N from the aggregate.
    pub fn roll(&self) -> HashMap<String, u64> {
        let mut ring = self.ring.write();
        let slots = self.width + 1;

        // The previous read_from becomes the next current.
        let recycled = ring.read_from;
        ring.windows[recycled] = (self.counter_factory)();

        // Gather counts from every slot in (read_from, read_from + width].
        let mut aggregate: HashMap<String, u64> = HashMap::new();
        let mut slot = (recycled + 1) % slots;
        while slot != recycled {
            for (key, count) in ring.windows[slot].snapshot().iter() {
                let total = aggregate.entry(key.clone()).or_insert(0);
                *total = total.wrapping_add(*count);
            }
            slot = (slot + 1) % slots;
        }

        // Shift read_from, read_to, current right by exactly one position.
        ring.read_to = ring.current;
        ring.current = recycled;
        ring.read_from = (recycled + 1) % slots;

        top_n(self.scorer.as_ref(), aggregate, self.top_n, self.threshold)
    }

    #[cfg(test)]
    fn marks(&self) -> (usize, usize, usize) {
        let ring = self.ring.read();
        (ring.read_from, ring.read_to, ring.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::ShardedCounter;
    use crate::topn::tests::UnitScorer;

    fn windows(width: usize, top_n: usize, threshold: u64) -> RollingWindows {
        RollingWindows::new(
            Arc::new(UnitScorer),
            || Arc::new(ShardedCounter::new(1)),
            width,
            top_n,
            threshold,
        )
    }

    fn as_map(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs
            .iter()
            .map(|(key, count)| (key.to_string(), *count))
            .collect()
    }

    #[test]
    fn initial_marks() {
        let windows = windows(4, 3, 1);
        assert_eq!(windows.marks(), (0, 3, 4));
    }

    #[test]
    fn rolls_shift_marks_and_age_out_windows() {
        let windows = windows(4, 3, 1);

        windows.increment("some_key", 1);
        windows.increment("some_key", 1);
        windows.increment("another_key", 1);
        assert_eq!(
            windows.roll(),
            as_map(&[("some_key", 2), ("another_key", 1)])
        );
        assert_eq!(windows.marks(), (1, 4, 0));

        windows.increment("some_key", 1);
        windows.increment("some_key", 1);
        windows.increment("another_key", 1);
        assert_eq!(
            windows.roll(),
            as_map(&[("some_key", 4), ("another_key", 2)])
        );
        assert_eq!(windows.marks(), (2, 0, 1));

        windows.roll();
        assert_eq!(windows.marks(), (3, 1, 2));

        windows.roll();
        assert_eq!(windows.marks(), (4, 2, 3));

        // The first window has aged out of the horizon.
        assert_eq!(
            windows.roll(),
            as_map(&[("some_key", 2), ("another_key", 1)])
        );
        assert_eq!(windows.marks(), (0, 3, 4));
    }

    #[test]
    fn roll_excludes_the_accumulating_window() {
        let windows = windows(2, 10, 0);

        windows.increment("early", 1);
        let first = windows.roll();
        assert_eq!(first, as_map(&[("early", 1)]));

        // Lands in the new current; not visible until the next roll.
        windows.increment("late", 1);
        let second = windows.roll();
        assert_eq!(second, as_map(&[("early", 1), ("late", 1)]));
    }

    #[test]
    fn increments_race_free_after_roll() {
        let windows = windows(2, 10, 0);
        windows.increment("k", 3);
        windows.roll();
        windows.increment("k", 5);
        // Second window now holds 5; horizon covers both.
        assert_eq!(windows.roll(), as_map(&[("k", 8)]));
    }
}
