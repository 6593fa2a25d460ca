//! The shared replication buffer and per-connection cursors.

use crate::connection::ConnectionId;
use bytes::{Buf, Bytes, BytesMut};
use sequora_protocol::BroadcastEvent;
use std::collections::HashMap;

/// Result of draining one cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Newly available encoded events since the last flush.
    Events(Bytes),
    /// Nothing new since the last flush.
    Empty,
    /// The ring dropped bytes the cursor had not read yet. The cursor's
    /// state is unusable; the connection must be re-bootstrapped.
    Lagged,
    /// The connection has no cursor.
    NotSubscribed,
}

#[derive(Debug)]
struct Cursor {
    /// Absolute ring offset of the next unread byte.
    pos: u64,
}

/// A bounded ring of encoded protocol events shared by every subscribed
/// connection, plus the per-connection cursor registry.
///
/// Writers append under the replication lock; each cursor reads at its
/// own pace. The ring keeps at most `capacity` bytes: when an append
/// overflows it, the oldest bytes are dropped and any cursor still
/// pointing at them reports [`FlushOutcome::Lagged`] on its next flush,
/// forcing a fresh bootstrap. Dropping is the explicit backpressure
/// policy - the ring never grows past its bound.
///
/// Not independently synchronized: the handler's replication lock guards
/// it (acquired after the state lock, never before).
#[derive(Debug)]
pub struct ReplicationBuffer {
    ring: BytesMut,
    /// Absolute offset of `ring[0]` since the sequencer started.
    base: u64,
    capacity: usize,
    cursors: HashMap<ConnectionId, Cursor>,
}

impl ReplicationBuffer {
    /// Creates a buffer bounded to `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "replication buffer needs capacity");
        Self {
            ring: BytesMut::new(),
            base: 0,
            capacity,
            cursors: HashMap::new(),
        }
    }

    /// Absolute offset one past the newest byte.
    #[must_use]
    pub fn head(&self) -> u64 {
        self.base + self.ring.len() as u64
    }

    /// Appends a commit event.
    pub fn write_commit(&mut self, start: u64, commit: u64) {
        self.push(&BroadcastEvent::Committed { start, commit });
    }

    /// Appends a half-abort event.
    pub fn write_half_abort(&mut self, start: u64) {
        self.push(&BroadcastEvent::Aborted { start });
    }

    /// Appends a full-abort event.
    pub fn write_full_abort(&mut self, start: u64) {
        self.push(&BroadcastEvent::Cleaned { start });
    }

    /// Appends a watermark-increase event.
    pub fn write_watermark_raise(&mut self, value: u64) {
        self.push(&BroadcastEvent::WatermarkRaised { value });
    }

    fn push(&mut self, event: &BroadcastEvent) {
        event.encode_into(&mut self.ring);
        if self.ring.len() > self.capacity {
            let drop = self.ring.len() - self.capacity;
            self.ring.advance(drop);
            self.base += drop as u64;
        }
    }

    /// Returns true if the connection already has a cursor.
    #[must_use]
    pub fn has_cursor(&self, conn: ConnectionId) -> bool {
        self.cursors.contains_key(&conn)
    }

    /// Registers a cursor for the connection at the current head.
    pub fn open_cursor(&mut self, conn: ConnectionId) {
        let pos = self.head();
        self.cursors.insert(conn, Cursor { pos });
    }

    /// Removes the connection's cursor (connection dropped).
    pub fn remove_cursor(&mut self, conn: ConnectionId) {
        self.cursors.remove(&conn);
    }

    /// Positions the cursor at the head and returns the bootstrap prefix:
    /// the stream-position marker, the current watermark, then one abort
    /// report per half-aborted transaction - in that fixed order.
    ///
    /// The caller must hold the state lock as well, which makes the
    /// prefix atomic with respect to concurrent appends: every event the
    /// cursor later reads strictly follows the state captured here.
    pub fn bootstrap(
        &mut self,
        conn: ConnectionId,
        watermark: u64,
        half_aborted: impl Iterator<Item = u64>,
    ) -> Bytes {
        let pos = self.head();
        self.cursors.insert(conn, Cursor { pos });

        let mut prefix = BytesMut::new();
        BroadcastEvent::StreamPosition { offset: pos }.encode_into(&mut prefix);
        BroadcastEvent::WatermarkRaised { value: watermark }.encode_into(&mut prefix);
        for start in half_aborted {
            BroadcastEvent::Aborted { start }.encode_into(&mut prefix);
        }
        prefix.freeze()
    }

    /// Drains newly available bytes for one cursor. Non-blocking.
    pub fn flush(&mut self, conn: ConnectionId) -> FlushOutcome {
        let head = self.head();
        let base = self.base;
        let Some(cursor) = self.cursors.get_mut(&conn) else {
            return FlushOutcome::NotSubscribed;
        };

        if cursor.pos < base {
            return FlushOutcome::Lagged;
        }
        if cursor.pos == head {
            return FlushOutcome::Empty;
        }

        let from = (cursor.pos - base) as usize;
        cursor.pos = head;
        FlushOutcome::Events(Bytes::copy_from_slice(&self.ring[from..]))
    }

    /// Number of registered cursors.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.cursors.len()
    }
}
