//! Request and response messages for the sequencer connection stream.

use crate::error::{ProtocolError, ProtocolResult};
use crate::row::RowKey;
use crate::wire::{take_bool, take_u32, take_u64, take_u8};
use bytes::{Buf, BufMut};

// Request type codes. Responses set the high bit so a stream dump is
// unambiguous about direction.
const TIMESTAMP_REQUEST: u8 = 0x01;
const COMMIT_REQUEST: u8 = 0x02;
const ABORT_REQUEST: u8 = 0x03;
const FULL_ABORT_REQUEST: u8 = 0x04;
const COMMIT_QUERY_REQUEST: u8 = 0x05;

const TIMESTAMP_RESPONSE: u8 = 0x81;
const COMMIT_RESPONSE: u8 = 0x82;
const COMMIT_QUERY_RESPONSE: u8 = 0x85;

/// A request from a client connection to the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerRequest {
    /// Ask for a new start timestamp.
    Timestamp(TimestampRequest),
    /// Submit a write set for conflict checking and commit.
    Commit(CommitRequest),
    /// Client-initiated abort of an open transaction.
    Abort(AbortRequest),
    /// Client confirmation that an aborted transaction was cleaned up.
    FullAbort(FullAbortRequest),
    /// Ask whether another transaction committed.
    CommitQuery(CommitQueryRequest),
}

impl SequencerRequest {
    /// Returns the message type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            SequencerRequest::Timestamp(_) => TIMESTAMP_REQUEST,
            SequencerRequest::Commit(_) => COMMIT_REQUEST,
            SequencerRequest::Abort(_) => ABORT_REQUEST,
            SequencerRequest::FullAbort(_) => FULL_ABORT_REQUEST,
            SequencerRequest::CommitQuery(_) => COMMIT_QUERY_REQUEST,
        }
    }

    /// Encodes the request into the buffer.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.type_code());
        match self {
            SequencerRequest::Timestamp(_) => {}
            SequencerRequest::Commit(msg) => {
                buf.put_u64(msg.start_timestamp);
                buf.put_u32(msg.rows.len() as u32);
                for row in &msg.rows {
                    row.encode_into(buf);
                }
            }
            SequencerRequest::Abort(msg) => buf.put_u64(msg.start_timestamp),
            SequencerRequest::FullAbort(msg) => buf.put_u64(msg.start_timestamp),
            SequencerRequest::CommitQuery(msg) => {
                buf.put_u64(msg.start_timestamp);
                buf.put_u64(msg.query_timestamp);
            }
        }
    }

    /// Decodes one request from the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated input or an unknown type code.
    pub fn decode(buf: &mut impl Buf) -> ProtocolResult<Self> {
        match take_u8(buf)? {
            TIMESTAMP_REQUEST => Ok(Self::Timestamp(TimestampRequest)),
            COMMIT_REQUEST => {
                let start_timestamp = take_u64(buf)?;
                let count = take_u32(buf)? as usize;
                let mut rows = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    rows.push(RowKey::decode(buf)?);
                }
                Ok(Self::Commit(CommitRequest {
                    start_timestamp,
                    rows,
                }))
            }
            ABORT_REQUEST => Ok(Self::Abort(AbortRequest {
                start_timestamp: take_u64(buf)?,
            })),
            FULL_ABORT_REQUEST => Ok(Self::FullAbort(FullAbortRequest {
                start_timestamp: take_u64(buf)?,
            })),
            COMMIT_QUERY_REQUEST => Ok(Self::CommitQuery(CommitQueryRequest {
                start_timestamp: take_u64(buf)?,
                query_timestamp: take_u64(buf)?,
            })),
            code => Err(ProtocolError::UnknownType { code }),
        }
    }
}

/// Request for a new start timestamp. Carries no fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampRequest;

/// Response carrying a freshly issued start timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampResponse {
    /// The issued timestamp.
    pub timestamp: u64,
}

/// A commit request: the transaction's start timestamp plus one row key
/// per written cell.
///
/// An empty row set is legal and always commits (there is nothing to
/// conflict with).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Start timestamp identifying the transaction.
    pub start_timestamp: u64,
    /// Identity of every cell the transaction wrote.
    pub rows: Vec<RowKey>,
}

impl CommitRequest {
    /// Creates a commit request.
    pub fn new(start_timestamp: u64, rows: Vec<RowKey>) -> Self {
        Self {
            start_timestamp,
            rows,
        }
    }
}

/// The sequencer's commit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResponse {
    /// Start timestamp the decision is for.
    pub start_timestamp: u64,
    /// Whether the transaction committed.
    pub committed: bool,
    /// The commit timestamp when `committed` is true, 0 otherwise.
    pub commit_timestamp: u64,
}

impl CommitResponse {
    /// An abort decision for `start_timestamp`.
    #[must_use]
    pub fn aborted(start_timestamp: u64) -> Self {
        Self {
            start_timestamp,
            committed: false,
            commit_timestamp: 0,
        }
    }

    /// A commit decision with the assigned commit timestamp.
    #[must_use]
    pub fn committed(start_timestamp: u64, commit_timestamp: u64) -> Self {
        Self {
            start_timestamp,
            committed: true,
            commit_timestamp,
        }
    }
}

/// Client-initiated abort before a commit decision. No reply is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortRequest {
    /// Start timestamp of the transaction being abandoned.
    pub start_timestamp: u64,
}

/// Client confirmation that a half-aborted transaction was cleaned up.
/// No reply is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullAbortRequest {
    /// Start timestamp of the cleaned-up transaction.
    pub start_timestamp: u64,
}

/// Question about another transaction's fate, asked from the viewpoint of
/// the transaction identified by `start_timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitQueryRequest {
    /// The asking transaction's start timestamp.
    pub start_timestamp: u64,
    /// The transaction being asked about.
    pub query_timestamp: u64,
}

/// Three-way answer to a commit query.
///
/// `committed` is true only when the queried transaction committed at a
/// timestamp visible to the asker's snapshot (commit timestamp strictly
/// below the asker's start). `retry` is true when the outcome cannot be
/// determined yet and the caller must ask again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitQueryResponse {
    /// The asking transaction's start timestamp.
    pub start_timestamp: u64,
    /// The transaction that was asked about.
    pub query_timestamp: u64,
    /// Whether the queried transaction is committed and visible.
    pub committed: bool,
    /// The queried transaction's commit timestamp, 0 if unknown.
    pub commit_timestamp: u64,
    /// Whether the caller must re-ask later.
    pub retry: bool,
}

/// A response from the sequencer to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerResponse {
    /// A freshly issued timestamp.
    Timestamp(TimestampResponse),
    /// A commit decision.
    Commit(CommitResponse),
    /// A commit-query answer.
    CommitQuery(CommitQueryResponse),
}

impl SequencerResponse {
    /// Returns the message type code.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            SequencerResponse::Timestamp(_) => TIMESTAMP_RESPONSE,
            SequencerResponse::Commit(_) => COMMIT_RESPONSE,
            SequencerResponse::CommitQuery(_) => COMMIT_QUERY_RESPONSE,
        }
    }

    /// Encodes the response into the buffer.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.type_code());
        match self {
            SequencerResponse::Timestamp(msg) => buf.put_u64(msg.timestamp),
            SequencerResponse::Commit(msg) => {
                buf.put_u64(msg.start_timestamp);
                buf.put_u8(u8::from(msg.committed));
                buf.put_u64(msg.commit_timestamp);
            }
            SequencerResponse::CommitQuery(msg) => {
                buf.put_u64(msg.start_timestamp);
                buf.put_u64(msg.query_timestamp);
                buf.put_u8(u8::from(msg.committed));
                buf.put_u64(msg.commit_timestamp);
                buf.put_u8(u8::from(msg.retry));
            }
        }
    }

    /// Decodes one response from the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated input or an unknown type code.
    pub fn decode(buf: &mut impl Buf) -> ProtocolResult<Self> {
        match take_u8(buf)? {
            TIMESTAMP_RESPONSE => Ok(Self::Timestamp(TimestampResponse {
                timestamp: take_u64(buf)?,
            })),
            COMMIT_RESPONSE => Ok(Self::Commit(CommitResponse {
                start_timestamp: take_u64(buf)?,
                committed: take_bool(buf)?,
                commit_timestamp: take_u64(buf)?,
            })),
            COMMIT_QUERY_RESPONSE => Ok(Self::CommitQuery(CommitQueryResponse {
                start_timestamp: take_u64(buf)?,
                query_timestamp: take_u64(buf)?,
                committed: take_bool(buf)?,
                commit_timestamp: take_u64(buf)?,
                retry: take_bool(buf)?,
            })),
            code => Err(ProtocolError::UnknownType { code }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_request(msg: SequencerRequest) {
        let mut buf = Vec::new();
        msg.encode_into(&mut buf);
        let decoded = SequencerRequest::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn timestamp_request_roundtrip() {
        roundtrip_request(SequencerRequest::Timestamp(TimestampRequest));
    }

    #[test]
    fn commit_request_roundtrip() {
        let rows = vec![
            RowKey::new("t", "row-1", "cf", "a"),
            RowKey::new("t", "row-2", "cf", "b"),
        ];
        roundtrip_request(SequencerRequest::Commit(CommitRequest::new(42, rows)));
    }

    #[test]
    fn commit_request_empty_rows_roundtrip() {
        roundtrip_request(SequencerRequest::Commit(CommitRequest::new(7, vec![])));
    }

    #[test]
    fn abort_and_full_abort_roundtrip() {
        roundtrip_request(SequencerRequest::Abort(AbortRequest {
            start_timestamp: 100,
        }));
        roundtrip_request(SequencerRequest::FullAbort(FullAbortRequest {
            start_timestamp: 100,
        }));
    }

    #[test]
    fn commit_query_roundtrip() {
        roundtrip_request(SequencerRequest::CommitQuery(CommitQueryRequest {
            start_timestamp: 101,
            query_timestamp: 90,
        }));
    }

    #[test]
    fn response_roundtrips() {
        for msg in [
            SequencerResponse::Timestamp(TimestampResponse { timestamp: 55 }),
            SequencerResponse::Commit(CommitResponse::committed(55, 56)),
            SequencerResponse::Commit(CommitResponse::aborted(55)),
            SequencerResponse::CommitQuery(CommitQueryResponse {
                start_timestamp: 60,
                query_timestamp: 55,
                committed: true,
                commit_timestamp: 56,
                retry: false,
            }),
        ] {
            let mut buf = Vec::new();
            msg.encode_into(&mut buf);
            let decoded = SequencerResponse::decode(&mut buf.as_slice()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn unknown_type_code_fails() {
        let buf = [0x7Fu8];
        let err = SequencerRequest::decode(&mut buf.as_slice()).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType { code: 0x7F });
    }

    #[test]
    fn truncated_commit_fails() {
        let mut buf = Vec::new();
        SequencerRequest::Commit(CommitRequest::new(9, vec![RowKey::new("t", "r", "f", "q")]))
            .encode_into(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            SequencerRequest::decode(&mut buf.as_slice()),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn request_and_response_codes_are_disjoint() {
        let req = SequencerRequest::Timestamp(TimestampRequest).type_code();
        let resp = SequencerResponse::Timestamp(TimestampResponse { timestamp: 1 }).type_code();
        assert_ne!(req, resp);
    }
}
