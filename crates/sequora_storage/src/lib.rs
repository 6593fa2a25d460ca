//! # Sequora Storage
//!
//! Log store trait and implementations for the Sequora sequencer.
//!
//! This crate provides the lowest-level storage abstraction for the
//! sequencer's durable log. Log stores are **opaque byte stores** - they
//! do not interpret the record batches appended to them; the core crate
//! owns the log format.
//!
//! ## Design Principles
//!
//! - Stores are simple append-only byte stores (append, flush, read)
//! - No knowledge of log record framing or batching
//! - Must be `Send` so the log writer thread can own them
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sequencers
//! - [`FileStore`] - For persistent storage; holds an exclusive file lock
//!   so only one sequencer instance can own a log at a time
//!
//! ## Example
//!
//! ```rust
//! use sequora_storage::{LogStore, InMemoryStore};
//!
//! let mut store = InMemoryStore::new();
//! let offset = store.append(b"record batch").unwrap();
//! let data = store.read_at(offset, 12).unwrap();
//! assert_eq!(&data, b"record batch");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::LogStore;
