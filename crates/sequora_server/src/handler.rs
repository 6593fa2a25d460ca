//! Per-connection request dispatch and the sequencer state machine.

use crate::batcher::{CommitBatcher, ReplyBatch};
use crate::config::SequencerConfig;
use crate::connection::{Connection, ConnectionId, Outbound};
use crate::error::ServerResult;
use crate::replication::{FlushOutcome, ReplicationBuffer};
use parking_lot::{Mutex, MutexGuard};
use sequora_core::{
    CommitTable, ConflictKey, LogRecord, LogWriter, SequencerMetrics, Timestamp, TimestampOracle,
    UncommittedTransactionSet,
};
use sequora_protocol::{
    AbortRequest, CommitQueryRequest, CommitQueryResponse, CommitRequest, CommitResponse,
    FullAbortRequest, RowKey, SequencerRequest, SequencerResponse, TimestampResponse,
};
use std::ops::{Deref, DerefMut};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

/// Message to the aborted-snapshot compactor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompactorSignal {
    /// Write a compaction snapshot.
    Run,
    /// Stop the compactor thread.
    Stop,
}

/// Everything guarded by the state lock.
///
/// Commit decisions must be linearizable with respect to timestamp
/// issuance and watermark changes, so the oracle, the open set, the
/// commit table and the WAL encode buffer are one atomic unit of state.
struct SequencerState {
    oracle: TimestampOracle,
    uncommitted: UncommittedTransactionSet,
    commit_table: CommitTable,
    /// The largest deleted timestamp: conflict history at or below it has
    /// been discarded. Only ever increases.
    largest_deleted: Timestamp,
    /// Watermark at the last scheduled compaction snapshot.
    previous_snapshot_watermark: Timestamp,
    batcher: CommitBatcher,
}

#[cfg(debug_assertions)]
thread_local! {
    static REPLICATION_HELD: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Replication-lock guard that feeds the debug lock-order checker.
struct ReplicationGuard<'a> {
    guard: MutexGuard<'a, ReplicationBuffer>,
}

impl Deref for ReplicationGuard<'_> {
    type Target = ReplicationBuffer;

    fn deref(&self) -> &ReplicationBuffer {
        &self.guard
    }
}

impl DerefMut for ReplicationGuard<'_> {
    fn deref_mut(&mut self) -> &mut ReplicationBuffer {
        &mut self.guard
    }
}

impl Drop for ReplicationGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        REPLICATION_HELD.with(|held| held.set(false));
    }
}

/// The sequencer's request dispatcher.
///
/// One handler serves every connection. All mutation of decision state
/// happens under the state lock; the replication ring and cursor registry
/// have their own lock.
///
/// # Lock ordering
///
/// The state lock is always acquired before the replication lock when an
/// operation needs both; the reverse order is never taken. Debug builds
/// assert this on every acquisition.
///
/// # I/O discipline
///
/// No request path blocks on I/O under the state lock; records are
/// encoded in memory and made durable by the log writer's thread, which
/// releases the batched replies. The one amortized exception is the
/// oracle's allocation record at batch boundaries.
pub struct SequencerHandler {
    state: Mutex<SequencerState>,
    replication: Mutex<ReplicationBuffer>,
    writer: Arc<LogWriter<ReplyBatch>>,
    metrics: Arc<SequencerMetrics>,
    config: SequencerConfig,
    snapshot_tx: SyncSender<CompactorSignal>,
}

impl SequencerHandler {
    /// Creates a handler over a fresh sequencer state.
    pub(crate) fn new(
        config: SequencerConfig,
        writer: Arc<LogWriter<ReplyBatch>>,
        metrics: Arc<SequencerMetrics>,
        snapshot_tx: SyncSender<CompactorSignal>,
    ) -> Self {
        let state = SequencerState {
            oracle: TimestampOracle::new(config.allocation_batch),
            uncommitted: UncommittedTransactionSet::new(),
            commit_table: CommitTable::with_capacity(config.conflict_slots, config.commit_slots),
            largest_deleted: Timestamp::new(0),
            previous_snapshot_watermark: Timestamp::new(0),
            batcher: CommitBatcher::new(config.batch_threshold),
        };

        Self {
            state: Mutex::new(state),
            replication: Mutex::new(ReplicationBuffer::with_capacity(
                config.replication_capacity,
            )),
            writer,
            metrics,
            config,
            snapshot_tx,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SequencerState> {
        #[cfg(debug_assertions)]
        assert!(
            !REPLICATION_HELD.with(std::cell::Cell::get),
            "lock order violation: state lock acquired while holding the replication lock"
        );
        self.state.lock()
    }

    fn lock_replication(&self) -> ReplicationGuard<'_> {
        #[cfg(debug_assertions)]
        {
            assert!(
                !REPLICATION_HELD.with(std::cell::Cell::get),
                "replication lock is not re-entrant"
            );
            REPLICATION_HELD.with(|held| held.set(true));
        }
        ReplicationGuard {
            guard: self.replication.lock(),
        }
    }

    /// Routes one decoded request to its handler.
    pub fn dispatch(&self, conn: &Connection, request: &SequencerRequest) -> ServerResult<()> {
        match request {
            SequencerRequest::Timestamp(_) => self.handle_timestamp(conn),
            SequencerRequest::Commit(msg) => self.handle_commit(conn, msg),
            SequencerRequest::Abort(msg) => {
                self.handle_abort(msg);
                Ok(())
            }
            SequencerRequest::FullAbort(msg) => {
                self.handle_full_abort(msg);
                Ok(())
            }
            SequencerRequest::CommitQuery(msg) => {
                self.handle_commit_query(conn, msg);
                Ok(())
            }
        }
    }

    /// Issues a start timestamp and marks the transaction open.
    ///
    /// The connection's first timestamp request also subscribes it to the
    /// replication stream: the bootstrap prefix and any live tail are
    /// delivered before the timestamp response.
    ///
    /// # Errors
    ///
    /// Returns an error if the oracle could not durably log allocation
    /// progress; the connection receives an explicit failure.
    pub fn handle_timestamp(&self, conn: &Connection) -> ServerResult<()> {
        let timestamp = {
            let mut state = self.lock_state();
            match state.oracle.next(&*self.writer) {
                Ok(ts) => {
                    state.uncommitted.start(ts);
                    ts
                }
                Err(err) => {
                    let _ = conn.sink.send(Outbound::Failure(err.to_string()));
                    return Err(err.into());
                }
            }
        };
        self.metrics.record_begin();

        self.sync_cursor(conn);

        let _ = conn.sink.send(Outbound::Response(SequencerResponse::Timestamp(
            TimestampResponse {
                timestamp: timestamp.as_u64(),
            },
        )));
        Ok(())
    }

    /// Bootstraps the connection's cursor if needed, then drains its live
    /// tail.
    fn sync_cursor(&self, conn: &Connection) {
        let subscribed = self.lock_replication().has_cursor(conn.id);
        if !subscribed {
            self.bootstrap_connection(conn);
        }

        let outcome = self.lock_replication().flush(conn.id);
        match outcome {
            FlushOutcome::Events(bytes) => {
                let _ = conn.sink.send(Outbound::Events(bytes));
            }
            FlushOutcome::Empty | FlushOutcome::NotSubscribed => {}
            FlushOutcome::Lagged => {
                tracing::warn!(conn = %conn.id, "replication cursor lagged behind the ring; re-bootstrapping");
                self.bootstrap_connection(conn);
            }
        }
    }

    /// Registers the connection's cursor and sends the bootstrap prefix:
    /// ring position, watermark, then the half-aborted set, strictly
    /// before any live event.
    fn bootstrap_connection(&self, conn: &Connection) {
        // State lock first: the prefix must be consistent with the
        // watermark and half-aborted set it reports.
        let state = self.lock_state();
        let mut replication = self.lock_replication();
        let prefix = replication.bootstrap(
            conn.id,
            state.largest_deleted.as_u64(),
            state.commit_table.half_aborted().map(|(ts, _)| ts.as_u64()),
        );
        drop(replication);
        drop(state);

        let _ = conn.sink.send(Outbound::Events(prefix));
    }

    /// Decides a commit request.
    ///
    /// The reply is queued behind the durability of its decision record;
    /// duplicate requests are dropped without a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if a commit timestamp could not be allocated
    /// durably; the connection receives an explicit failure.
    pub fn handle_commit(&self, conn: &Connection, msg: &CommitRequest) -> ServerResult<()> {
        let start = Timestamp::new(msg.start_timestamp);
        let mut state = self.lock_state();

        let committed = if start < state.oracle.first() {
            tracing::warn!(%start, first = %state.oracle.first(),
                "rejecting commit for transaction begun before this incarnation");
            false
        } else if start <= state.largest_deleted {
            tracing::warn!(%start, watermark = %state.largest_deleted,
                "rejecting commit below the watermark");
            false
        } else if !state.uncommitted.is_uncommitted(start) {
            // Duplicate or stale decision request: the client already got
            // an answer once. Log and drop - replying again could reorder
            // against the original decision.
            match state.commit_table.committed_timestamp(start) {
                Some(commit) => tracing::error!(%start, %commit,
                    "duplicate commit request for committed transaction"),
                None => tracing::error!(%start,
                    "duplicate commit request for aborted transaction"),
            }
            self.metrics.record_duplicate_request();
            return Ok(());
        } else {
            !self.find_conflict(&state, start, &msg.rows)
        };

        if committed {
            let commit = match state.oracle.next(&*self.writer) {
                Ok(ts) => ts,
                Err(err) => {
                    let _ = conn.sink.send(Outbound::Failure(err.to_string()));
                    return Err(err.into());
                }
            };
            state.uncommitted.commit(start);
            state.batcher.encode(&LogRecord::Commit { start, commit });

            // Record every written row; evictions mean lost conflict
            // history, which the watermark must grow to cover.
            let mut watermark_candidate = state.largest_deleted;
            for row in &msg.rows {
                let key = ConflictKey::new(row.conflict_key());
                if let Some(evicted) = state.commit_table.record_write(key, commit) {
                    watermark_candidate = watermark_candidate.max(evicted);
                }
            }
            if let Some(evicted) = state.commit_table.record_commit(start, commit) {
                watermark_candidate = watermark_candidate.max(evicted);
            }
            if watermark_candidate > state.largest_deleted {
                self.raise_watermark(&mut state, watermark_candidate);
            }

            self.lock_replication()
                .write_commit(start.as_u64(), commit.as_u64());
            self.metrics.record_commit();

            state.batcher.push_reply(
                conn.sink.clone(),
                SequencerResponse::Commit(CommitResponse::committed(
                    start.as_u64(),
                    commit.as_u64(),
                )),
            );
        } else {
            self.metrics.record_conflict_abort();
            state.batcher.encode(&LogRecord::Abort { start });

            if start >= state.largest_deleted {
                // Below the watermark it is already on the aborted list
                if state.uncommitted.is_uncommitted(start) {
                    state.uncommitted.commit(start);
                }
                state.commit_table.add_aborted(start);
                self.lock_replication().write_half_abort(start.as_u64());
            }

            state.batcher.push_reply(
                conn.sink.clone(),
                SequencerResponse::Commit(CommitResponse::aborted(start.as_u64())),
            );
        }

        self.maybe_submit(&mut state);
        Ok(())
    }

    /// Runs the write-write conflict scan, short-circuiting on the first
    /// conflicting row.
    fn find_conflict(&self, state: &SequencerState, start: Timestamp, rows: &[RowKey]) -> bool {
        for row in rows {
            let key = ConflictKey::new(row.conflict_key());
            match state.commit_table.latest_write(key) {
                Some(latest) if latest > start => {
                    tracing::debug!(%start, %key, %latest, "write-write conflict");
                    return true;
                }
                None if state.largest_deleted > start => {
                    // The slot that could disprove a conflict was already
                    // recycled; assume the worst.
                    tracing::warn!(%start, watermark = %state.largest_deleted,
                        "conflict slot recycled under old transaction; treating as conflict");
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Client-initiated abort before a commit decision. No reply.
    pub fn handle_abort(&self, msg: &AbortRequest) {
        let start = Timestamp::new(msg.start_timestamp);
        let mut state = self.lock_state();

        if start < state.largest_deleted {
            tracing::warn!(%start, watermark = %state.largest_deleted,
                "abort request below the watermark; transaction is already aborted");
            return;
        }
        if !state.uncommitted.is_uncommitted(start) {
            match state.commit_table.committed_timestamp(start) {
                Some(commit) => tracing::error!(%start, %commit,
                    "abort request for transaction already committed"),
                None => tracing::error!(%start,
                    "abort request for transaction already aborted"),
            }
            self.metrics.record_duplicate_request();
            return;
        }

        state.batcher.encode(&LogRecord::Abort { start });
        self.metrics.record_self_abort();
        state.uncommitted.commit(start);
        state.commit_table.add_aborted(start);

        self.lock_replication().write_half_abort(start.as_u64());
    }

    /// Client confirmation that a half-aborted transaction was cleaned
    /// up. No reply.
    pub fn handle_full_abort(&self, msg: &FullAbortRequest) {
        let start = Timestamp::new(msg.start_timestamp);
        {
            let mut state = self.lock_state();
            state.batcher.encode(&LogRecord::FullAbort { start });
            if !state.commit_table.remove_aborted(start) {
                tracing::debug!(%start, "full abort for transaction not in the half-aborted set");
            }
            self.metrics.record_cleaned_abort();
        }

        self.lock_replication().write_full_abort(start.as_u64());
    }

    /// Answers whether `query_timestamp` committed, from the viewpoint of
    /// the asking transaction.
    ///
    /// Replied immediately - no durability decision is pending here. If
    /// the queried transaction's fate is indeterminate the response asks
    /// the caller to retry.
    pub fn handle_commit_query(&self, conn: &Connection, msg: &CommitQueryRequest) {
        self.metrics.record_query();
        let query = Timestamp::new(msg.query_timestamp);

        let mut reply = CommitQueryResponse {
            start_timestamp: msg.start_timestamp,
            query_timestamp: msg.query_timestamp,
            committed: false,
            commit_timestamp: 0,
            retry: false,
        };

        {
            let state = self.lock_state();
            if let Some(commit) = state.commit_table.committed_timestamp(query) {
                reply.commit_timestamp = commit.as_u64();
                // A commit at or after the asker's start is a conflict,
                // not a visible commit
                reply.committed = commit.as_u64() < msg.start_timestamp;
            } else if state.commit_table.is_half_aborted(query)
                || state.uncommitted.is_uncommitted(query)
            {
                // Aborted or still open: not committed
            } else {
                // Unknown to every table: possibly being decided right
                // now, possibly evicted history. The caller must re-ask.
                reply.retry = true;
                self.metrics.record_query_retry();
            }
        }

        let _ = conn.sink.send(Outbound::Response(SequencerResponse::CommitQuery(reply)));
    }

    /// Raises the watermark and force-aborts every open transaction the
    /// raise sweeps.
    fn raise_watermark(&self, state: &mut SequencerState, new: Timestamp) {
        state.largest_deleted = new;
        state.batcher.encode(&LogRecord::WatermarkRaise { value: new });

        let swept = state.uncommitted.raise_largest_deleted(new);
        if !swept.is_empty() {
            tracing::warn!(count = swept.len(), watermark = %new,
                "slow transactions force-aborted by watermark raise");
        }
        self.metrics.record_swept_aborts(swept.len() as u64);

        {
            let mut replication = self.lock_replication();
            for &ts in &swept {
                state.commit_table.add_aborted(ts);
                state.batcher.encode(&LogRecord::Abort { start: ts });
                replication.write_half_abort(ts.as_u64());
            }
            replication.write_watermark_raise(new.as_u64());
        }

        if new.as_u64() > state.previous_snapshot_watermark.as_u64() + self.config.snapshot_threshold
        {
            // A pending signal means a pass is already queued; coalesce
            let _ = self.snapshot_tx.try_send(CompactorSignal::Run);
            state.previous_snapshot_watermark = new;
        }
    }

    /// Submits the current batch when the encode buffer crossed the
    /// threshold. Runs under the state lock so batches reach the writer
    /// in decision order.
    fn maybe_submit(&self, state: &mut SequencerState) {
        if state.batcher.should_flush() {
            let (bytes, batch) = state.batcher.take();
            self.writer.submit(bytes, batch);
        }
    }

    /// Submits whatever the batcher holds. The flush timer calls this on
    /// a fixed delay so buffered replies have bounded staleness even
    /// under low load.
    pub fn flush(&self) {
        let mut state = self.lock_state();
        if state.batcher.is_empty() {
            return;
        }
        let (bytes, batch) = state.batcher.take();
        self.writer.submit(bytes, batch);
    }

    /// Writes a compaction snapshot of the half-aborted set.
    ///
    /// Called from the compactor thread. State is captured under the
    /// lock; the durable append happens outside it.
    pub fn write_aborted_snapshot(&self) {
        let (generation, entries) = {
            let mut state = self.lock_state();
            let generation = state.commit_table.next_snapshot_generation();
            let entries: Vec<Timestamp> = state
                .commit_table
                .half_aborted()
                .filter(|&(_, stamped)| stamped <= generation)
                .map(|(ts, _)| ts)
                .collect();
            (generation, entries)
        };

        let mut buf = Vec::with_capacity(9 + entries.len() * 9);
        LogRecord::Snapshot { generation }.encode_into(&mut buf);
        for start in entries {
            LogRecord::Abort { start }.encode_into(&mut buf);
        }

        match self.writer.append_sync(buf) {
            Ok(_) => self.metrics.record_snapshot(),
            Err(err) => {
                tracing::error!(error = %err, generation, "failed to write aborted snapshot");
            }
        }
    }

    /// Drops the connection's replication cursor.
    ///
    /// Takes only the replication lock (consistent with the lock order);
    /// in-flight decisions for the connection's transactions are not
    /// unwound.
    pub fn handle_disconnect(&self, conn: ConnectionId) {
        self.lock_replication().remove_cursor(conn);
    }

    /// Returns false once a durable append has failed; a poisoned
    /// sequencer never acknowledges another decision.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.writer.is_poisoned()
    }

    /// Current largest deleted timestamp.
    #[must_use]
    pub fn largest_deleted(&self) -> Timestamp {
        self.lock_state().largest_deleted
    }

    /// Number of currently open transactions.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.lock_state().uncommitted.len()
    }

    /// Number of replication subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock_replication().subscriber_count()
    }
}

impl std::fmt::Debug for SequencerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerHandler")
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}
