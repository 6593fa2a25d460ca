//! The set of currently open transactions.

use crate::types::Timestamp;
use std::collections::BTreeSet;

/// Tracks start timestamps of transactions that are neither committed nor
/// aborted yet.
///
/// The set supports the watermark sweep: raising the largest deleted
/// timestamp removes and returns every still-open transaction at or below
/// it, which the caller must force-abort.
///
/// Operating on a timestamp that was never [`start`](Self::start)ed (or
/// was already removed) is a caller bug, not a runtime fault - callers
/// check [`is_uncommitted`](Self::is_uncommitted) first, under the same
/// state lock.
#[derive(Debug, Default)]
pub struct UncommittedTransactionSet {
    open: BTreeSet<Timestamp>,
}

impl UncommittedTransactionSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a start timestamp as open.
    pub fn start(&mut self, ts: Timestamp) {
        let inserted = self.open.insert(ts);
        debug_assert!(inserted, "timestamp {ts} started twice");
    }

    /// Returns true if the transaction is still open.
    #[must_use]
    pub fn is_uncommitted(&self, ts: Timestamp) -> bool {
        self.open.contains(&ts)
    }

    /// Removes a transaction from the open set (it committed or aborted).
    pub fn commit(&mut self, ts: Timestamp) {
        let removed = self.open.remove(&ts);
        debug_assert!(removed, "timestamp {ts} was not open");
    }

    /// Atomically raises the watermark and sweeps the open set.
    ///
    /// Returns every still-open timestamp at or below `watermark`, in
    /// ascending order, removed from the set. The caller must treat each
    /// of them as aborted.
    pub fn raise_largest_deleted(&mut self, watermark: Timestamp) -> Vec<Timestamp> {
        let keep = self.open.split_off(&watermark.next());
        let swept = std::mem::replace(&mut self.open, keep);
        swept.into_iter().collect()
    }

    /// Number of currently open transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Returns true if no transaction is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(v: u64) -> Timestamp {
        Timestamp::new(v)
    }

    #[test]
    fn start_and_commit() {
        let mut set = UncommittedTransactionSet::new();
        set.start(ts(1));
        assert!(set.is_uncommitted(ts(1)));

        set.commit(ts(1));
        assert!(!set.is_uncommitted(ts(1)));
        assert!(set.is_empty());
    }

    #[test]
    fn sweep_returns_only_at_or_below_watermark() {
        let mut set = UncommittedTransactionSet::new();
        for v in [10, 20, 30, 40] {
            set.start(ts(v));
        }

        let swept = set.raise_largest_deleted(ts(30));
        assert_eq!(swept, vec![ts(10), ts(20), ts(30)]);

        assert!(!set.is_uncommitted(ts(30)));
        assert!(set.is_uncommitted(ts(40)));
    }

    #[test]
    fn sweep_exact_boundary_is_inclusive() {
        let mut set = UncommittedTransactionSet::new();
        set.start(ts(50));
        let swept = set.raise_largest_deleted(ts(50));
        assert_eq!(swept, vec![ts(50)]);
    }

    #[test]
    fn sweep_of_empty_set_is_empty() {
        let mut set = UncommittedTransactionSet::new();
        assert!(set.raise_largest_deleted(ts(100)).is_empty());
    }

    #[test]
    fn committed_transactions_are_not_swept() {
        let mut set = UncommittedTransactionSet::new();
        set.start(ts(5));
        set.start(ts(6));
        set.commit(ts(5));

        let swept = set.raise_largest_deleted(ts(10));
        assert_eq!(swept, vec![ts(6)]);
    }

    proptest! {
        #[test]
        fn sweep_partitions_the_set(
            starts in proptest::collection::btree_set(1u64..10_000, 0..100),
            watermark in 1u64..10_000,
        ) {
            let mut set = UncommittedTransactionSet::new();
            for &v in &starts {
                set.start(ts(v));
            }

            let swept = set.raise_largest_deleted(ts(watermark));

            for t in &swept {
                prop_assert!(t.as_u64() <= watermark);
            }
            for &v in &starts {
                let remained = set.is_uncommitted(ts(v));
                if v <= watermark {
                    prop_assert!(!remained);
                    prop_assert!(swept.contains(&ts(v)));
                } else {
                    prop_assert!(remained);
                }
            }
        }
    }
}
