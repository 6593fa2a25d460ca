//! # Sequora Core
//!
//! Commit-processing engine for the Sequora sequencer.
//!
//! This crate provides the leaves of the sequencer's state machine:
//! - [`TimestampOracle`] - strictly increasing timestamps, allocation
//!   progress durably logged in batches
//! - [`UncommittedTransactionSet`] - currently open start timestamps and
//!   the watermark sweep
//! - [`CommitTable`] - last committer per row conflict key, the committed
//!   cache and the half-aborted set
//! - [`LogRecord`] / [`LogWriter`] - the durable commit/abort log with
//!   asynchronous, batched appends
//! - [`SequencerMetrics`] - process-scoped counters
//!
//! None of these types synchronize themselves; the sequencer handler owns
//! the single state lock under which they are mutated (the log writer's
//! background thread is the one exception and has its own channel).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commit_table;
mod error;
mod metrics;
mod oracle;
mod types;
mod uncommitted;
mod wal;

pub use commit_table::CommitTable;
pub use error::{CoreError, CoreResult};
pub use metrics::{MetricsSnapshot, SequencerMetrics};
pub use oracle::{AllocationSink, TimestampOracle};
pub use types::{ConflictKey, Timestamp};
pub use uncommitted::UncommittedTransactionSet;
pub use wal::{LogCompletion, LogRecord, LogWriter};
