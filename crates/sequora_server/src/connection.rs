//! Per-connection identity and reply delivery.

use bytes::Bytes;
use sequora_protocol::SequencerResponse;
use std::fmt;
use std::sync::mpsc::Sender;

/// Identifies one client connection for the lifetime of the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Creates a connection id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// One message from the sequencer to a connection.
///
/// The transport layer drains these from the connection's receiver and
/// writes them to the wire. Replies are typed (the transport encodes
/// them); replication events arrive pre-encoded because the shared ring
/// stores wire bytes.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A response to one of this connection's requests.
    Response(SequencerResponse),
    /// A run of encoded broadcast events from the replication stream.
    Events(Bytes),
    /// The sequencer could not durably decide this connection's pending
    /// requests. The transport should surface the error and close; the
    /// client retries against the recovered sequencer.
    Failure(String),
}

/// Sending half of a connection's outbound queue.
pub type OutboundSender = Sender<Outbound>;

/// A connected client as the handler sees it.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Stable identity of the connection.
    pub id: ConnectionId,
    /// Where replies and events for this connection go.
    pub sink: OutboundSender,
}
