//! Sequencer server wiring.

use crate::config::SequencerConfig;
use crate::connection::{Connection, ConnectionId, Outbound};
use crate::error::ServerResult;
use crate::handler::{CompactorSignal, SequencerHandler};
use sequora_core::{LogWriter, SequencerMetrics};
use sequora_protocol::SequencerRequest;
use sequora_storage::{FileStore, InMemoryStore, LogStore};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The sequencer service.
///
/// Owns the request handler, the log writer and the two background
/// workers: the flush timer (bounds reply staleness) and the
/// aborted-snapshot compactor (bounds recovery-replay cost). Transport is
/// out of scope - callers [`connect`](Self::connect) to obtain a
/// connection handle plus the receiving end of its outbound queue, decode
/// requests off their own wire, and pass them to
/// [`handle_request`](Self::handle_request).
///
/// # Example
///
/// ```
/// use sequora_server::{SequencerConfig, SequencerServer};
/// use sequora_protocol::{SequencerRequest, TimestampRequest};
///
/// let server = SequencerServer::in_memory(SequencerConfig::default());
/// let (conn, outbound) = server.connect();
///
/// server
///     .handle_request(&conn, &SequencerRequest::Timestamp(TimestampRequest))
///     .unwrap();
/// // outbound now yields the bootstrap events and the timestamp response
/// # drop(outbound);
/// ```
pub struct SequencerServer {
    handler: Arc<SequencerHandler>,
    metrics: Arc<SequencerMetrics>,
    next_connection: AtomicU64,
    flush_stop: Sender<()>,
    snapshot_tx: SyncSender<CompactorSignal>,
    flush_thread: Option<JoinHandle<()>>,
    compactor_thread: Option<JoinHandle<()>>,
}

impl SequencerServer {
    /// Starts a sequencer over the given log store.
    #[must_use]
    pub fn start(config: SequencerConfig, store: Box<dyn LogStore>) -> Self {
        let metrics = Arc::new(SequencerMetrics::new());
        let writer = Arc::new(LogWriter::new(store, Arc::clone(&metrics)));

        let (snapshot_tx, snapshot_rx) = sync_channel(1);
        let handler = Arc::new(SequencerHandler::new(
            config.clone(),
            writer,
            Arc::clone(&metrics),
            snapshot_tx.clone(),
        ));

        let flush_handler = Arc::clone(&handler);
        let (flush_stop, flush_stop_rx) = channel();
        let interval = config.flush_interval;
        let flush_thread = std::thread::Builder::new()
            .name("sequora-flusher".into())
            .spawn(move || run_flusher(&flush_handler, &flush_stop_rx, interval))
            .ok();

        let compactor_handler = Arc::clone(&handler);
        let compactor_thread = std::thread::Builder::new()
            .name("sequora-compactor".into())
            .spawn(move || run_compactor(&compactor_handler, &snapshot_rx))
            .ok();

        Self {
            handler,
            metrics,
            next_connection: AtomicU64::new(1),
            flush_stop,
            snapshot_tx,
            flush_thread,
            compactor_thread,
        }
    }

    /// Starts a sequencer over an in-memory log (tests, ephemeral runs).
    #[must_use]
    pub fn in_memory(config: SequencerConfig) -> Self {
        Self::start(config, Box::new(InMemoryStore::new()))
    }

    /// Starts a sequencer over a file-backed log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened or another
    /// sequencer instance holds its lock.
    pub fn open(config: SequencerConfig, path: &Path) -> ServerResult<Self> {
        let store = FileStore::open_with_create_dirs(path)?;
        Ok(Self::start(config, Box::new(store)))
    }

    /// Registers a new connection.
    ///
    /// Returns the handle request processing uses and the receiving end
    /// of the connection's outbound queue.
    pub fn connect(&self) -> (Connection, Receiver<Outbound>) {
        let id = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::SeqCst));
        let (sink, outbound) = channel();
        (Connection { id, sink }, outbound)
    }

    /// Processes one request on behalf of a connection.
    ///
    /// # Errors
    ///
    /// Returns an error only for durability faults; protocol-visible
    /// outcomes (conflicts, staleness, retries) are delivered through the
    /// connection's outbound queue.
    pub fn handle_request(
        &self,
        conn: &Connection,
        request: &SequencerRequest,
    ) -> ServerResult<()> {
        self.handler.dispatch(conn, request)
    }

    /// Tears down a dropped connection's replication state.
    pub fn disconnect(&self, conn: ConnectionId) {
        self.handler.handle_disconnect(conn);
    }

    /// The request handler (shared with the background workers).
    #[must_use]
    pub fn handler(&self) -> &SequencerHandler {
        &self.handler
    }

    /// This instance's metrics.
    #[must_use]
    pub fn metrics(&self) -> &SequencerMetrics {
        &self.metrics
    }

    /// Returns false once a durable append has failed; a poisoned
    /// instance stops acknowledging decisions.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.handler.is_healthy()
    }

    /// Stops the background workers and drains the log writer.
    pub fn shutdown(&mut self) {
        // Flush whatever replies are still buffered before stopping
        self.handler.flush();

        let _ = self.flush_stop.send(());
        if let Some(thread) = self.flush_thread.take() {
            let _ = thread.join();
        }

        let _ = self.snapshot_tx.send(CompactorSignal::Stop);
        if let Some(thread) = self.compactor_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SequencerServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SequencerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerServer")
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

/// Fixed-delay flush loop: re-arms after every flush so buffered replies
/// have bounded staleness even when the batch threshold is never reached.
fn run_flusher(handler: &SequencerHandler, stop: &Receiver<()>, interval: std::time::Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => handler.flush(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Single-worker compaction loop. The capacity-1 signal channel coalesces
/// requests that arrive while a pass is running.
fn run_compactor(handler: &SequencerHandler, signals: &Receiver<CompactorSignal>) {
    while let Ok(signal) = signals.recv() {
        match signal {
            CompactorSignal::Run => handler.write_aborted_snapshot(),
            CompactorSignal::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequora_protocol::{
        CommitRequest, RowKey, SequencerResponse, TimestampRequest,
    };
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn test_config() -> SequencerConfig {
        SequencerConfig::new()
            .batch_threshold(64 * 1024)
            .flush_interval(Duration::from_millis(2))
            .allocation_batch(1_000)
            .conflict_slots(64)
            .commit_slots(64)
    }

    fn take_timestamp(server: &SequencerServer, conn: &Connection, rx: &Receiver<Outbound>) -> u64 {
        server
            .handle_request(conn, &SequencerRequest::Timestamp(TimestampRequest))
            .unwrap();
        loop {
            match rx.recv_timeout(TIMEOUT).unwrap() {
                Outbound::Response(SequencerResponse::Timestamp(reply)) => return reply.timestamp,
                Outbound::Events(_) => {}
                other => panic!("unexpected outbound: {other:?}"),
            }
        }
    }

    #[test]
    fn server_lifecycle() {
        let mut server = SequencerServer::in_memory(test_config());
        assert!(server.is_healthy());
        assert_eq!(server.metrics().snapshot().begins, 0);
        server.shutdown();
    }

    #[test]
    fn timer_flushes_replies_without_reaching_threshold() {
        // Large threshold: only the timer can release this reply
        let server = SequencerServer::in_memory(test_config());
        let (conn, rx) = server.connect();

        let start = take_timestamp(&server, &conn, &rx);
        server
            .handle_request(
                &conn,
                &SequencerRequest::Commit(CommitRequest::new(
                    start,
                    vec![RowKey::new("t", "r", "f", "q")],
                )),
            )
            .unwrap();

        loop {
            match rx.recv_timeout(TIMEOUT).unwrap() {
                Outbound::Response(SequencerResponse::Commit(reply)) => {
                    assert!(reply.committed);
                    break;
                }
                Outbound::Events(_) => {}
                other => panic!("unexpected outbound: {other:?}"),
            }
        }
    }

    #[test]
    fn compactor_runs_on_watermark_advance() {
        // Single conflict slot and zero threshold: first eviction-driven
        // watermark raise schedules a snapshot
        let config = test_config().conflict_slots(1).snapshot_threshold(0);
        let server = SequencerServer::in_memory(config);
        let (conn, rx) = server.connect();

        let t1 = take_timestamp(&server, &conn, &rx);
        let t2 = take_timestamp(&server, &conn, &rx);
        for (ts, name) in [(t1, "a"), (t2, "b")] {
            server
                .handle_request(
                    &conn,
                    &SequencerRequest::Commit(CommitRequest::new(
                        ts,
                        vec![RowKey::new("t", name, "f", "q")],
                    )),
                )
                .unwrap();
        }

        // The compactor thread picks the signal up and writes a snapshot
        let deadline = std::time::Instant::now() + TIMEOUT;
        while server.metrics().snapshot().snapshots == 0 {
            assert!(
                std::time::Instant::now() < deadline,
                "compactor never ran a snapshot pass"
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn connections_get_distinct_ids() {
        let server = SequencerServer::in_memory(test_config());
        let (a, _rx_a) = server.connect();
        let (b, _rx_b) = server.connect();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn disconnect_unsubscribes() {
        let server = SequencerServer::in_memory(test_config());
        let (conn, rx) = server.connect();

        take_timestamp(&server, &conn, &rx);
        assert_eq!(server.handler().subscriber_count(), 1);

        server.disconnect(conn.id);
        assert_eq!(server.handler().subscriber_count(), 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut server = SequencerServer::in_memory(test_config());
        server.shutdown();
        server.shutdown();
    }
}
