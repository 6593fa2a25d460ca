//! Sequencer configuration.

use std::time::Duration;

/// Configuration for a sequencer instance.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Encoded bytes of decision records that cut a durability batch.
    pub batch_threshold: usize,
    /// Maximum staleness of buffered replies: the flush timer re-arms
    /// with this fixed delay after every flush.
    pub flush_interval: Duration,
    /// Timestamps promised to the log per allocation record.
    pub allocation_batch: u64,
    /// Slots in the row conflict table.
    pub conflict_slots: usize,
    /// Slots in the committed cache.
    pub commit_slots: usize,
    /// Bytes retained by the replication ring.
    pub replication_capacity: usize,
    /// Watermark advance since the last compaction snapshot that
    /// schedules the next one.
    pub snapshot_threshold: u64,
}

impl SequencerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durability batch threshold in bytes.
    #[must_use]
    pub const fn batch_threshold(mut self, bytes: usize) -> Self {
        self.batch_threshold = bytes;
        self
    }

    /// Sets the reply flush interval.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the timestamp allocation batch size.
    #[must_use]
    pub const fn allocation_batch(mut self, batch: u64) -> Self {
        self.allocation_batch = batch;
        self
    }

    /// Sets the row conflict table capacity.
    #[must_use]
    pub const fn conflict_slots(mut self, slots: usize) -> Self {
        self.conflict_slots = slots;
        self
    }

    /// Sets the committed cache capacity.
    #[must_use]
    pub const fn commit_slots(mut self, slots: usize) -> Self {
        self.commit_slots = slots;
        self
    }

    /// Sets the replication ring capacity in bytes.
    #[must_use]
    pub const fn replication_capacity(mut self, bytes: usize) -> Self {
        self.replication_capacity = bytes;
        self
    }

    /// Sets the watermark advance that schedules a compaction snapshot.
    #[must_use]
    pub const fn snapshot_threshold(mut self, advance: u64) -> Self {
        self.snapshot_threshold = advance;
        self
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 1024,
            flush_interval: Duration::from_millis(10),
            allocation_batch: 100_000,
            conflict_slots: 1 << 20,
            commit_slots: 1 << 20,
            replication_capacity: 1 << 20,
            snapshot_threshold: 10_000,
        }
    }
}
