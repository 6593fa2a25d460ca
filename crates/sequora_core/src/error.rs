//! Error types for the sequencer core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in sequencer core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Log store error.
    #[error("storage error: {0}")]
    Storage(#[from] sequora_storage::StorageError),

    /// The durable log contains bytes that do not decode as records.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A durable append failed or the log writer already observed a
    /// failure. Decisions affected by this error were never acknowledged.
    #[error("durability failure: {message}")]
    Durability {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a log-corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a durability-failure error.
    pub fn durability(message: impl Into<String>) -> Self {
        Self::Durability {
            message: message.into(),
        }
    }
}
