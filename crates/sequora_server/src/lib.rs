//! # Sequora Server
//!
//! The sequencer service: per-connection request dispatch, commit
//! batching against log durability, and the replication fan-out buffer.
//!
//! This crate provides:
//! - [`SequencerServer`] - wiring: log writer, flush timer and the
//!   aborted-snapshot compactor
//! - [`SequencerHandler`] - the request state machine and the dual-lock
//!   discipline (state lock before replication lock, never the reverse)
//! - [`CommitBatcher`] - replies held until their decision records are
//!   durable, released FIFO
//! - [`ReplicationBuffer`] - bounded shared ring of broadcast events with
//!   one cursor per subscriber and bootstrap-before-live ordering
//!
//! # Architecture
//!
//! One logical worker per connection; all decision state is serialized
//! through the handler's single state lock. Durable appends happen on the
//! log writer's thread, which releases batched replies - no request path
//! blocks on I/O while holding the state lock. Transport (framing,
//! sockets) is out of scope: callers decode [`sequora_protocol`] requests
//! from their own wire and drain per-connection outbound queues.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batcher;
mod config;
mod connection;
mod error;
mod handler;
mod replication;
mod server;

pub use batcher::{CommitBatcher, PendingReply, ReplyBatch};
pub use config::SequencerConfig;
pub use connection::{Connection, ConnectionId, Outbound, OutboundSender};
pub use error::{ServerError, ServerResult};
pub use handler::SequencerHandler;
pub use replication::{FlushOutcome, ReplicationBuffer};
pub use server::SequencerServer;
