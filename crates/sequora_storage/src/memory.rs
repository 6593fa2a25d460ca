//! In-memory log store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::LogStore;
use parking_lot::RwLock;

/// An in-memory log store.
///
/// This store keeps the whole log in memory and is suitable for:
/// - Unit tests
/// - Integration tests that replay the log afterwards
/// - Ephemeral sequencers that don't need persistence
///
/// # Example
///
/// ```rust
/// use sequora_storage::{LogStore, InMemoryStore};
///
/// let mut store = InMemoryStore::new();
/// let offset = store.append(b"batch").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(store.len().unwrap(), 5);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<Vec<u8>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory store with pre-existing log contents.
    ///
    /// Useful for testing replay scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the whole log.
    ///
    /// Tests use this to hand the log to a replay pass.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl LogStore for InMemoryStore {
    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing buffered
        Ok(())
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}
