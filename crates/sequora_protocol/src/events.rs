//! Broadcast events pushed to replication subscribers.

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{take_u64, take_u8};
use bytes::{Buf, BufMut};

const COMMITTED: u8 = 0x41;
const ABORTED: u8 = 0x42;
const CLEANED: u8 = 0x43;
const WATERMARK_RAISED: u8 = 0x44;
const STREAM_POSITION: u8 = 0x45;

/// One event in the replication stream.
///
/// Subscribers receive a bootstrap prefix when their cursor is opened -
/// [`StreamPosition`](BroadcastEvent::StreamPosition), then
/// [`WatermarkRaised`](BroadcastEvent::WatermarkRaised) with the current
/// watermark, then one [`Aborted`](BroadcastEvent::Aborted) per currently
/// half-aborted transaction - and after that the live tail, in append
/// order. The prefix lets a subscriber reconstruct exact sequencer state
/// before interpreting deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastEvent {
    /// A transaction committed.
    Committed {
        /// Start timestamp of the committed transaction.
        start: u64,
        /// Its commit timestamp.
        commit: u64,
    },
    /// A transaction was half-aborted (server decided, client not yet
    /// acknowledged).
    Aborted {
        /// Start timestamp of the aborted transaction.
        start: u64,
    },
    /// A client confirmed cleanup of a half-aborted transaction.
    Cleaned {
        /// Start timestamp of the cleaned transaction.
        start: u64,
    },
    /// The largest-deleted-timestamp watermark increased.
    WatermarkRaised {
        /// The new watermark value.
        value: u64,
    },
    /// Bootstrap marker carrying the subscriber's position in the shared
    /// ring at subscription time.
    StreamPosition {
        /// Absolute ring offset the cursor starts at.
        offset: u64,
    },
}

impl BroadcastEvent {
    /// Returns the event type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            BroadcastEvent::Committed { .. } => COMMITTED,
            BroadcastEvent::Aborted { .. } => ABORTED,
            BroadcastEvent::Cleaned { .. } => CLEANED,
            BroadcastEvent::WatermarkRaised { .. } => WATERMARK_RAISED,
            BroadcastEvent::StreamPosition { .. } => STREAM_POSITION,
        }
    }

    /// Encodes the event into the buffer.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.type_code());
        match self {
            BroadcastEvent::Committed { start, commit } => {
                buf.put_u64(*start);
                buf.put_u64(*commit);
            }
            BroadcastEvent::Aborted { start } | BroadcastEvent::Cleaned { start } => {
                buf.put_u64(*start);
            }
            BroadcastEvent::WatermarkRaised { value } => buf.put_u64(*value),
            BroadcastEvent::StreamPosition { offset } => buf.put_u64(*offset),
        }
    }

    /// Decodes one event from the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated input or an unknown type code.
    pub fn decode(buf: &mut impl Buf) -> ProtocolResult<Self> {
        match take_u8(buf)? {
            COMMITTED => Ok(Self::Committed {
                start: take_u64(buf)?,
                commit: take_u64(buf)?,
            }),
            ABORTED => Ok(Self::Aborted {
                start: take_u64(buf)?,
            }),
            CLEANED => Ok(Self::Cleaned {
                start: take_u64(buf)?,
            }),
            WATERMARK_RAISED => Ok(Self::WatermarkRaised {
                value: take_u64(buf)?,
            }),
            STREAM_POSITION => Ok(Self::StreamPosition {
                offset: take_u64(buf)?,
            }),
            code => Err(ProtocolError::UnknownType { code }),
        }
    }

    /// Decodes every event in the buffer.
    ///
    /// Subscribers use this to interpret the byte runs a cursor flush
    /// produced.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer does not contain a whole number of
    /// valid events.
    pub fn decode_all(mut bytes: &[u8]) -> ProtocolResult<Vec<Self>> {
        let mut events = Vec::new();
        while bytes.has_remaining() {
            events.push(Self::decode(&mut bytes)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_roundtrips() {
        for event in [
            BroadcastEvent::Committed {
                start: 10,
                commit: 12,
            },
            BroadcastEvent::Aborted { start: 11 },
            BroadcastEvent::Cleaned { start: 11 },
            BroadcastEvent::WatermarkRaised { value: 50 },
            BroadcastEvent::StreamPosition { offset: 4096 },
        ] {
            let mut buf = Vec::new();
            event.encode_into(&mut buf);
            let decoded = BroadcastEvent::decode(&mut buf.as_slice()).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn decode_all_preserves_order() {
        let mut buf = Vec::new();
        BroadcastEvent::StreamPosition { offset: 0 }.encode_into(&mut buf);
        BroadcastEvent::WatermarkRaised { value: 5 }.encode_into(&mut buf);
        BroadcastEvent::Committed {
            start: 10,
            commit: 12,
        }
        .encode_into(&mut buf);

        let events = BroadcastEvent::decode_all(&buf).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], BroadcastEvent::StreamPosition { .. }));
        assert!(matches!(events[1], BroadcastEvent::WatermarkRaised { .. }));
        assert!(matches!(events[2], BroadcastEvent::Committed { .. }));
    }

    #[test]
    fn decode_all_rejects_partial_event() {
        let mut buf = Vec::new();
        BroadcastEvent::Aborted { start: 9 }.encode_into(&mut buf);
        buf.truncate(buf.len() - 2);
        assert!(BroadcastEvent::decode_all(&buf).is_err());
    }
}
