//! Asynchronous, batched log appends.

use crate::error::{CoreError, CoreResult};
use crate::metrics::SequencerMetrics;
use crate::oracle::AllocationSink;
use crate::wal::LogRecord;
use sequora_storage::LogStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Completion handed to [`LogWriter::submit`] along with a record batch.
///
/// The writer thread invokes it exactly once, after the batch's append
/// and flush finished (or failed). This is the handoff between the append
/// call and the reply-drain step: replies to clients are released from
/// inside `complete`, so no decision is observable before its record is
/// durable.
pub trait LogCompletion: Send + 'static {
    /// Called with the batch's outcome. `Ok` carries the offset the batch
    /// was written at.
    fn complete(self, result: CoreResult<u64>);
}

enum Job<C> {
    Batch { bytes: Vec<u8>, completion: C },
    Sync { bytes: Vec<u8>, done: Sender<CoreResult<u64>> },
    Shutdown,
}

/// Owns the log store and performs all appends on a dedicated thread.
///
/// Batches submitted with [`submit`](Self::submit) complete
/// asynchronously in submission order (the thread is the only writer, so
/// the channel order is the log order). [`append_sync`](Self::append_sync)
/// routes through the same thread and blocks until durable; the oracle
/// uses it for allocation records, the compactor for snapshots.
///
/// # Failure policy
///
/// A failed append poisons the writer: the failing batch and every batch
/// after it complete with [`CoreError::Durability`], and
/// [`is_poisoned`](Self::is_poisoned) turns true. The in-memory sequencer
/// state may already include decisions the log never accepted, so a
/// poisoned instance must stop serving decisions; it never acknowledges
/// one. Restart and replay are the way back.
pub struct LogWriter<C: LogCompletion> {
    tx: Sender<Job<C>>,
    poisoned: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<C: LogCompletion> LogWriter<C> {
    /// Starts a writer thread owning the given store.
    #[must_use]
    pub fn new(store: Box<dyn LogStore>, metrics: Arc<SequencerMetrics>) -> Self {
        let (tx, rx) = channel();
        let poisoned = Arc::new(AtomicBool::new(false));

        let thread_poisoned = Arc::clone(&poisoned);
        let handle = std::thread::Builder::new()
            .name("sequora-log-writer".into())
            .spawn(move || run_writer(store, rx, &thread_poisoned, &metrics))
            .ok();

        Self {
            tx,
            poisoned,
            handle,
        }
    }

    /// Submits a record batch for durable append.
    ///
    /// Returns immediately; `completion` fires from the writer thread
    /// once the batch is durable or failed. Submitting an empty batch is
    /// allowed and completes successfully without touching the store.
    pub fn submit(&self, bytes: Vec<u8>, completion: C) {
        if let Err(returned) = self.tx.send(Job::Batch { bytes, completion }) {
            // Writer thread is gone; fail the batch instead of losing it.
            if let Job::Batch { completion, .. } = returned.0 {
                completion.complete(Err(CoreError::durability("log writer stopped")));
            }
        }
    }

    /// Appends bytes and blocks until they are durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the append failed or the writer is poisoned
    /// or stopped.
    pub fn append_sync(&self, bytes: Vec<u8>) -> CoreResult<u64> {
        let (done, done_rx): (Sender<CoreResult<u64>>, Receiver<CoreResult<u64>>) = channel();
        self.tx
            .send(Job::Sync { bytes, done })
            .map_err(|_| CoreError::durability("log writer stopped"))?;
        done_rx
            .recv()
            .map_err(|_| CoreError::durability("log writer stopped"))?
    }

    /// Returns true once a durable append has failed.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Stops the writer thread after draining queued jobs.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<C: LogCompletion> Drop for LogWriter<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C: LogCompletion> std::fmt::Debug for LogWriter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

impl<C: LogCompletion> AllocationSink for LogWriter<C> {
    fn append_allocation(&self, record: &LogRecord) -> CoreResult<()> {
        self.append_sync(record.encode()).map(|_| ())
    }
}

fn run_writer<C: LogCompletion>(
    mut store: Box<dyn LogStore>,
    rx: Receiver<Job<C>>,
    poisoned: &AtomicBool,
    metrics: &SequencerMetrics,
) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Batch { bytes, completion } => {
                completion.complete(write(store.as_mut(), &bytes, poisoned, metrics));
            }
            Job::Sync { bytes, done } => {
                let _ = done.send(write(store.as_mut(), &bytes, poisoned, metrics));
            }
            Job::Shutdown => break,
        }
    }
}

fn write(
    store: &mut dyn LogStore,
    bytes: &[u8],
    poisoned: &AtomicBool,
    metrics: &SequencerMetrics,
) -> CoreResult<u64> {
    if poisoned.load(Ordering::Acquire) {
        return Err(CoreError::durability(
            "log writer poisoned by an earlier failure",
        ));
    }

    let result = store
        .append(bytes)
        .and_then(|offset| store.flush().map(|()| offset));

    match result {
        Ok(offset) => {
            metrics.record_batch_flushed(bytes.len() as u64);
            Ok(offset)
        }
        Err(err) => {
            poisoned.store(true, Ordering::Release);
            metrics.record_durability_failure();
            tracing::error!(error = %err, "durable append failed; poisoning log writer");
            Err(err.into())
        }
    }
}
