//! File-based log store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::LogStore;
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based log store.
///
/// The store appends to a single log file and holds an exclusive OS file
/// lock for its whole lifetime. The lock enforces the deployment assumption
/// that exactly one sequencer instance owns a log: a second open of the same
/// file fails with [`StorageError::Locked`] instead of silently interleaving
/// two timestamp streams.
///
/// # Durability
///
/// `flush()` calls `File::sync_data()`, so a completed flush means every
/// previously appended batch survives power loss.
///
/// # Example
///
/// ```no_run
/// use sequora_storage::{LogStore, FileStore};
/// use std::path::Path;
///
/// let mut store = FileStore::open(Path::new("sequencer.log")).unwrap();
/// store.append(b"record batch").unwrap();
/// store.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileStore {
    /// Opens or creates a log file at the given path.
    ///
    /// If the file exists it is opened for reading and appending; the
    /// existing contents are the previous incarnation's log, left intact
    /// for the replay component.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the log,
    /// or an I/O error if the file cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| StorageError::Locked {
                path: path.display().to_string(),
            })?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates a log file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file
    /// cannot be opened or locked.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStore for FileStore {
    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sequencer.log");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sequencer.log");

        let mut store = FileStore::open(&path).unwrap();

        let offset1 = store.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = store.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(store.len().unwrap(), 11);

        let data = store.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sequencer.log");

        let mut store = FileStore::open(&path).unwrap();
        store.append(b"hello").unwrap();

        let result = store.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sequencer.log");

        // Write then drop (releasing the lock)
        {
            let mut store = FileStore::open(&path).unwrap();
            store.append(b"persistent batch").unwrap();
            store.flush().unwrap();
        }

        // Reopen as the replay component would
        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.len().unwrap(), 16);

            let data = store.read_at(0, 16).unwrap();
            assert_eq!(&data, b"persistent batch");
        }
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sequencer.log");

        let _store = FileStore::open(&path).unwrap();

        let second = FileStore::open(&path);
        assert!(matches!(second, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn file_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sequencer.log");

        {
            let _store = FileStore::open(&path).unwrap();
        }

        assert!(FileStore::open(&path).is_ok());
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("logs").join("sequencer.log");

        let store = FileStore::open_with_create_dirs(&path).unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_empty_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sequencer.log");

        let mut store = FileStore::open(&path).unwrap();
        store.append(b"x").unwrap();

        let offset = store.append(b"").unwrap();
        assert_eq!(offset, 1);
        assert_eq!(store.len().unwrap(), 1);
    }
}
