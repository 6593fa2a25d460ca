//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the log.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current log size.
        size: u64,
    },

    /// Another sequencer instance holds the log's exclusive lock.
    #[error("log is locked by another sequencer instance: {path}")]
    Locked {
        /// Path of the locked log file.
        path: String,
    },
}
