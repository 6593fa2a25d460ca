//! # Sequora Protocol
//!
//! Wire messages and replication events for the Sequora sequencer.
//!
//! This crate provides:
//! - [`SequencerRequest`] / [`SequencerResponse`] for the per-connection
//!   request stream
//! - [`BroadcastEvent`] for the replication stream pushed to subscribers
//! - [`RowKey`] and conflict-key derivation for write-write conflict
//!   detection
//!
//! This is a pure protocol crate with no I/O operations. All multi-byte
//! integers are big-endian fixed-width; decoding is total and returns
//! [`ProtocolError`] on truncated or unknown input, never panics.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod events;
mod messages;
mod row;
mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use events::BroadcastEvent;
pub use messages::{
    AbortRequest, CommitQueryRequest, CommitQueryResponse, CommitRequest, CommitResponse,
    FullAbortRequest, SequencerRequest, SequencerResponse, TimestampRequest, TimestampResponse,
};
pub use row::RowKey;
