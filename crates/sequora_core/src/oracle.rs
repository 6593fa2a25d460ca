//! Timestamp issuance.

use crate::error::CoreResult;
use crate::types::Timestamp;
use crate::wal::LogRecord;

/// Default number of timestamps promised to the log per allocation record.
pub const DEFAULT_ALLOCATION_BATCH: u64 = 100_000;

/// Durable sink for timestamp allocation records.
///
/// The oracle must never hand out a timestamp it has not promised to the
/// log first, so this append is synchronous: it returns only once the
/// record is durable. [`crate::LogWriter`] implements it by routing the
/// record through its writer thread and waiting for the flush.
pub trait AllocationSink {
    /// Durably appends one allocation record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be made durable; the
    /// oracle then refuses to issue the timestamp.
    fn append_allocation(&self, record: &LogRecord) -> CoreResult<()>;
}

/// Allocates strictly increasing 64-bit timestamps.
///
/// Allocation progress is recorded in the durable log in batches: crossing
/// a batch boundary appends a [`LogRecord::TimestampAlloc`] carrying the
/// new upper bound before the first timestamp of that batch is returned.
/// A crash therefore never reuses a value - the next incarnation resumes
/// above the highest bound ever logged, skipping whatever remained of the
/// last batch (gaps inside the oracle are permitted, repeats are not).
///
/// The boundary append is the only blocking log write on the request path
/// and is amortized over `allocation_batch` calls.
///
/// Not independently synchronized: all calls happen under the sequencer's
/// state lock.
#[derive(Debug)]
pub struct TimestampOracle {
    /// Last timestamp handed out.
    last: u64,
    /// Highest timestamp promised to the log.
    max_allocated: u64,
    /// First timestamp of this incarnation.
    first: u64,
    /// Timestamps per allocation record.
    allocation_batch: u64,
}

impl TimestampOracle {
    /// Creates an oracle for a fresh log.
    #[must_use]
    pub fn new(allocation_batch: u64) -> Self {
        Self::recovered(0, allocation_batch)
    }

    /// Creates an oracle resuming after the given logged allocation bound.
    ///
    /// `max_logged` is the highest `TimestampAlloc` value the replay
    /// component found in the log (0 for an empty log). Every timestamp of
    /// the new incarnation is strictly above it.
    #[must_use]
    pub fn recovered(max_logged: u64, allocation_batch: u64) -> Self {
        assert!(allocation_batch > 0, "allocation batch must be non-zero");
        Self {
            last: max_logged,
            max_allocated: max_logged,
            first: max_logged + 1,
            allocation_batch,
        }
    }

    /// Issues the next timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch boundary was crossed and the allocation
    /// record could not be made durable. No timestamp is consumed in that
    /// case.
    pub fn next(&mut self, log: &dyn AllocationSink) -> CoreResult<Timestamp> {
        if self.last == self.max_allocated {
            let max = self.max_allocated + self.allocation_batch;
            log.append_allocation(&LogRecord::TimestampAlloc {
                max: Timestamp::new(max),
            })?;
            self.max_allocated = max;
        }

        self.last += 1;
        Ok(Timestamp::new(self.last))
    }

    /// Lowest timestamp valid since this oracle's incarnation.
    ///
    /// Commit requests for transactions that began under a previous
    /// incarnation are rejected by comparing against this value.
    #[must_use]
    pub fn first(&self) -> Timestamp {
        Timestamp::new(self.first)
    }

    /// Last timestamp handed out (0 if none yet this incarnation).
    #[must_use]
    pub fn last(&self) -> Timestamp {
        Timestamp::new(self.last)
    }
}
