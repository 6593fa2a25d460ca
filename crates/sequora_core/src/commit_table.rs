//! The commit table: last committer per row, committed cache and the
//! half-aborted set.

use crate::types::{ConflictKey, Timestamp};
use std::collections::HashMap;

/// One slot of the row conflict table.
#[derive(Debug, Clone, Copy, Default)]
struct RowSlot {
    /// Conflict key, 0 = empty.
    key: u64,
    /// Commit timestamp of the key's most recent committer.
    commit: u64,
}

/// One slot of the committed cache.
#[derive(Debug, Clone, Copy, Default)]
struct CommitSlot {
    /// Start timestamp, 0 = empty.
    start: u64,
    /// The transaction's commit timestamp.
    commit: u64,
}

/// Bounded conflict-detection state for the sequencer.
///
/// Both tables are direct-mapped: an entry lives in the slot its key
/// hashes to, and storing into an occupied slot evicts the previous
/// entry. Eviction is how the tables stay bounded, and it is not free:
/// an evicted row entry means the sequencer can no longer prove the
/// absence of a conflict against that commit, so the caller must fold the
/// evicted timestamp into the largest-deleted-timestamp watermark -
/// everything at or below it becomes effectively invisible.
///
/// Not independently synchronized: mutated only under the sequencer's
/// state lock.
#[derive(Debug)]
pub struct CommitTable {
    rows: Vec<RowSlot>,
    commits: Vec<CommitSlot>,
    /// Half-aborted transactions: start timestamp -> snapshot generation
    /// current when the abort was recorded.
    half_aborted: HashMap<Timestamp, u64>,
    snapshot_generation: u64,
}

impl CommitTable {
    /// Creates a commit table with the given slot counts.
    ///
    /// # Panics
    ///
    /// Panics if either capacity is zero.
    #[must_use]
    pub fn with_capacity(row_slots: usize, commit_slots: usize) -> Self {
        assert!(row_slots > 0, "row table needs at least one slot");
        assert!(commit_slots > 0, "committed cache needs at least one slot");
        Self {
            rows: vec![RowSlot::default(); row_slots],
            commits: vec![CommitSlot::default(); commit_slots],
            half_aborted: HashMap::new(),
            snapshot_generation: 0,
        }
    }

    /// Returns the commit timestamp of the row's most recent committer,
    /// or `None` if no commit is recorded for this key.
    #[must_use]
    pub fn latest_write(&self, key: ConflictKey) -> Option<Timestamp> {
        let slot = &self.rows[(key.as_u64() % self.rows.len() as u64) as usize];
        if slot.key == key.as_u64() {
            Some(Timestamp::new(slot.commit))
        } else {
            None
        }
    }

    /// Records `commit` as the row's most recent committer.
    ///
    /// Returns the commit timestamp evicted by slot pressure, if any. A
    /// same-key overwrite evicts nothing: the newer committer subsumes the
    /// older one for conflict purposes (any start that conflicts with the
    /// old commit also conflicts with the new, larger one).
    pub fn record_write(&mut self, key: ConflictKey, commit: Timestamp) -> Option<Timestamp> {
        let len = self.rows.len() as u64;
        let slot = &mut self.rows[(key.as_u64() % len) as usize];

        let evicted = if slot.key != 0 && slot.key != key.as_u64() {
            Some(Timestamp::new(slot.commit))
        } else {
            None
        };

        slot.key = key.as_u64();
        slot.commit = commit.as_u64();
        evicted
    }

    /// Returns the commit timestamp recorded for a start timestamp, or
    /// `None` if the transaction is not known to have committed.
    #[must_use]
    pub fn committed_timestamp(&self, start: Timestamp) -> Option<Timestamp> {
        let slot = &self.commits[(start.as_u64() % self.commits.len() as u64) as usize];
        if slot.start == start.as_u64() {
            Some(Timestamp::new(slot.commit))
        } else {
            None
        }
    }

    /// Records a start -> commit mapping.
    ///
    /// Returns the commit timestamp of an entry evicted by slot pressure,
    /// if any; the caller folds it into the watermark for the same reason
    /// as row-table evictions.
    pub fn record_commit(&mut self, start: Timestamp, commit: Timestamp) -> Option<Timestamp> {
        let len = self.commits.len() as u64;
        let slot = &mut self.commits[(start.as_u64() % len) as usize];

        let evicted = if slot.start != 0 && slot.start != start.as_u64() {
            Some(Timestamp::new(slot.commit))
        } else {
            None
        };

        slot.start = start.as_u64();
        slot.commit = commit.as_u64();
        evicted
    }

    /// Returns true if the transaction is half-aborted (aborted by the
    /// sequencer, cleanup not yet confirmed by the client).
    #[must_use]
    pub fn is_half_aborted(&self, start: Timestamp) -> bool {
        self.half_aborted.contains_key(&start)
    }

    /// Adds a transaction to the half-aborted set, stamped with the
    /// current snapshot generation.
    pub fn add_aborted(&mut self, start: Timestamp) {
        self.half_aborted.insert(start, self.snapshot_generation);
    }

    /// Removes a transaction from the half-aborted set after the client
    /// confirmed cleanup. Returns false if it was not in the set.
    pub fn remove_aborted(&mut self, start: Timestamp) -> bool {
        self.half_aborted.remove(&start).is_some()
    }

    /// Iterates the half-aborted set as (start, generation) pairs.
    ///
    /// Used for subscriber bootstrap and for compaction snapshots.
    pub fn half_aborted(&self) -> impl Iterator<Item = (Timestamp, u64)> + '_ {
        self.half_aborted.iter().map(|(&ts, &gen)| (ts, gen))
    }

    /// Number of half-aborted transactions.
    #[must_use]
    pub fn half_aborted_len(&self) -> usize {
        self.half_aborted.len()
    }

    /// Starts a compaction pass: returns the pass's generation and bumps
    /// the counter.
    ///
    /// Entries stamped at or below the returned generation existed before
    /// the pass and belong in its snapshot; entries recorded afterwards
    /// carry a higher stamp and are picked up by the next pass.
    pub fn next_snapshot_generation(&mut self) -> u64 {
        let generation = self.snapshot_generation;
        self.snapshot_generation += 1;
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: u64) -> Timestamp {
        Timestamp::new(v)
    }

    fn key(v: u64) -> ConflictKey {
        ConflictKey::new(v)
    }

    #[test]
    fn unknown_row_has_no_committer() {
        let table = CommitTable::with_capacity(16, 16);
        assert_eq!(table.latest_write(key(7)), None);
    }

    #[test]
    fn record_and_lookup_row_write() {
        let mut table = CommitTable::with_capacity(16, 16);
        assert_eq!(table.record_write(key(7), ts(102)), None);
        assert_eq!(table.latest_write(key(7)), Some(ts(102)));
    }

    #[test]
    fn same_key_overwrite_evicts_nothing() {
        let mut table = CommitTable::with_capacity(16, 16);
        table.record_write(key(7), ts(102));
        assert_eq!(table.record_write(key(7), ts(110)), None);
        assert_eq!(table.latest_write(key(7)), Some(ts(110)));
    }

    #[test]
    fn slot_pressure_evicts_and_reports() {
        // Capacity 4: keys 3 and 7 share a slot
        let mut table = CommitTable::with_capacity(4, 16);
        table.record_write(key(3), ts(50));

        let evicted = table.record_write(key(7), ts(60));
        assert_eq!(evicted, Some(ts(50)));

        // The evicted key is no longer visible
        assert_eq!(table.latest_write(key(3)), None);
        assert_eq!(table.latest_write(key(7)), Some(ts(60)));
    }

    #[test]
    fn aliased_cells_share_one_entry() {
        // Two distinct cells whose identities hash to the same conflict
        // key are indistinguishable here: the second cell's reader sees
        // the first cell's committer and must treat it as a conflict,
        // never as absent history.
        let mut table = CommitTable::with_capacity(16, 16);
        table.record_write(key(42), ts(10)); // cell A
        assert_eq!(table.latest_write(key(42)), Some(ts(10))); // cell B, same hash
    }

    #[test]
    fn committed_cache_roundtrip() {
        let mut table = CommitTable::with_capacity(16, 16);
        assert_eq!(table.committed_timestamp(ts(100)), None);

        assert_eq!(table.record_commit(ts(100), ts(102)), None);
        assert_eq!(table.committed_timestamp(ts(100)), Some(ts(102)));
    }

    #[test]
    fn committed_cache_eviction_reports_displaced_commit() {
        // Capacity 4: starts 1 and 5 share a slot
        let mut table = CommitTable::with_capacity(16, 4);
        table.record_commit(ts(1), ts(2));

        let evicted = table.record_commit(ts(5), ts(6));
        assert_eq!(evicted, Some(ts(2)));
        assert_eq!(table.committed_timestamp(ts(1)), None);
    }

    #[test]
    fn half_aborted_lifecycle() {
        let mut table = CommitTable::with_capacity(16, 16);
        assert!(!table.is_half_aborted(ts(9)));

        table.add_aborted(ts(9));
        assert!(table.is_half_aborted(ts(9)));
        assert_eq!(table.half_aborted_len(), 1);

        assert!(table.remove_aborted(ts(9)));
        assert!(!table.is_half_aborted(ts(9)));
        assert!(!table.remove_aborted(ts(9)));
    }

    #[test]
    fn snapshot_generation_stamps_new_aborts() {
        let mut table = CommitTable::with_capacity(16, 16);
        table.add_aborted(ts(1));

        let pass = table.next_snapshot_generation();
        assert_eq!(pass, 0);

        table.add_aborted(ts(2));

        let stamped: Vec<_> = table.half_aborted().collect();
        let before_pass: Vec<_> = stamped
            .iter()
            .filter(|&&(_, gen)| gen <= pass)
            .map(|&(t, _)| t)
            .collect();
        assert_eq!(before_pass, vec![ts(1)]);
    }
}
