//! Sequencer counters and telemetry.
//!
//! One `SequencerMetrics` instance lives on the sequencer it describes -
//! counters are fields with an explicit lifecycle, not process globals.
//! All counters are atomic and can be read while requests are in flight.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one sequencer instance.
#[derive(Debug, Default)]
pub struct SequencerMetrics {
    /// Timestamps issued (transactions begun).
    begins: AtomicU64,
    /// Commit requests accepted.
    commits: AtomicU64,
    /// Commit requests rejected by conflict or staleness.
    conflict_aborts: AtomicU64,
    /// Client-initiated aborts.
    self_aborts: AtomicU64,
    /// Open transactions force-aborted by a watermark raise.
    swept_aborts: AtomicU64,
    /// Half-aborted transactions confirmed cleaned by clients.
    cleaned_aborts: AtomicU64,
    /// Decision requests dropped as duplicates.
    duplicate_requests: AtomicU64,
    /// Commit queries answered.
    queries: AtomicU64,
    /// Commit queries answered with retry.
    query_retries: AtomicU64,
    /// Record batches made durable.
    batches_flushed: AtomicU64,
    /// Bytes appended to the durable log.
    bytes_logged: AtomicU64,
    /// Durable appends that failed.
    durability_failures: AtomicU64,
    /// Half-aborted-set compaction snapshots written.
    snapshots: AtomicU64,
}

impl SequencerMetrics {
    /// Creates a zeroed metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an issued timestamp.
    pub fn record_begin(&self) {
        self.begins.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an accepted commit.
    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a commit rejected by conflict or staleness.
    pub fn record_conflict_abort(&self) {
        self.conflict_aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a client-initiated abort.
    pub fn record_self_abort(&self) {
        self.self_aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records transactions force-aborted by a watermark raise.
    pub fn record_swept_aborts(&self, count: u64) {
        self.swept_aborts.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a confirmed cleanup.
    pub fn record_cleaned_abort(&self) {
        self.cleaned_aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dropped duplicate decision request.
    pub fn record_duplicate_request(&self) {
        self.duplicate_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an answered commit query.
    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a commit query that had to answer retry.
    pub fn record_query_retry(&self) {
        self.query_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a durable batch of the given size.
    pub fn record_batch_flushed(&self, bytes: u64) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.bytes_logged.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a failed durable append.
    pub fn record_durability_failure(&self) {
        self.durability_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a written compaction snapshot.
    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            begins: self.begins.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            conflict_aborts: self.conflict_aborts.load(Ordering::Relaxed),
            self_aborts: self.self_aborts.load(Ordering::Relaxed),
            swept_aborts: self.swept_aborts.load(Ordering::Relaxed),
            cleaned_aborts: self.cleaned_aborts.load(Ordering::Relaxed),
            duplicate_requests: self.duplicate_requests.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            query_retries: self.query_retries.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            bytes_logged: self.bytes_logged.load(Ordering::Relaxed),
            durability_failures: self.durability_failures.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of sequencer counters.
///
/// Unlike [`SequencerMetrics`], this is a plain struct that can be
/// compared or shipped elsewhere without atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Timestamps issued.
    pub begins: u64,
    /// Commits accepted.
    pub commits: u64,
    /// Commits rejected by conflict or staleness.
    pub conflict_aborts: u64,
    /// Client-initiated aborts.
    pub self_aborts: u64,
    /// Watermark-swept aborts.
    pub swept_aborts: u64,
    /// Confirmed cleanups.
    pub cleaned_aborts: u64,
    /// Dropped duplicate requests.
    pub duplicate_requests: u64,
    /// Commit queries answered.
    pub queries: u64,
    /// Commit queries answered with retry.
    pub query_retries: u64,
    /// Durable batches.
    pub batches_flushed: u64,
    /// Bytes appended to the log.
    pub bytes_logged: u64,
    /// Failed durable appends.
    pub durability_failures: u64,
    /// Compaction snapshots written.
    pub snapshots: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_are_zero() {
        let metrics = SequencerMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn counters_accumulate() {
        let metrics = SequencerMetrics::new();
        metrics.record_begin();
        metrics.record_begin();
        metrics.record_commit();
        metrics.record_swept_aborts(3);
        metrics.record_batch_flushed(128);

        let snap = metrics.snapshot();
        assert_eq!(snap.begins, 2);
        assert_eq!(snap.commits, 1);
        assert_eq!(snap.swept_aborts, 3);
        assert_eq!(snap.batches_flushed, 1);
        assert_eq!(snap.bytes_logged, 128);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(SequencerMetrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.record_begin();
                    m.record_query();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.begins, 800);
        assert_eq!(snap.queries, 800);
    }
}
