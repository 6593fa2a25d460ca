//! Error types for the sequencer server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sequencer server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Core engine error.
    #[error("core error: {0}")]
    Core(#[from] sequora_core::CoreError),

    /// Log store error.
    #[error("storage error: {0}")]
    Storage(#[from] sequora_storage::StorageError),

    /// Malformed request bytes.
    #[error("protocol error: {0}")]
    Protocol(#[from] sequora_protocol::ProtocolError),
}

impl ServerError {
    /// Returns true if the error means decisions can no longer be made
    /// durable and the instance must stop serving.
    #[must_use]
    pub fn is_durability(&self) -> bool {
        matches!(
            self,
            ServerError::Core(sequora_core::CoreError::Durability { .. })
                | ServerError::Core(sequora_core::CoreError::Storage(_))
                | ServerError::Storage(_)
        )
    }
}
