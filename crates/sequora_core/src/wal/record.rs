//! Log record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use bytes::{Buf, BufMut};

const TIMESTAMP_ALLOC: u8 = 0x01;
const COMMIT: u8 = 0x02;
const ABORT: u8 = 0x03;
const FULL_ABORT: u8 = 0x04;
const WATERMARK_RAISE: u8 = 0x05;
const SNAPSHOT: u8 = 0x06;

/// One record of the durable log.
///
/// Encoding is one leading type byte followed by fixed-width big-endian
/// fields, which makes the stream self-framing: a reader always knows the
/// record length from its first byte. A `Snapshot` record is followed in
/// the stream by the embedded `Abort` records of the compacted
/// half-aborted set for its generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecord {
    /// Timestamp allocation progress: every timestamp up to `max` may have
    /// been issued.
    TimestampAlloc {
        /// Highest timestamp the oracle may issue without logging again.
        max: Timestamp,
    },
    /// A transaction committed.
    Commit {
        /// Start timestamp.
        start: Timestamp,
        /// Assigned commit timestamp.
        commit: Timestamp,
    },
    /// A transaction was aborted (by the sequencer or the client).
    Abort {
        /// Start timestamp.
        start: Timestamp,
    },
    /// The client confirmed cleanup of an aborted transaction.
    FullAbort {
        /// Start timestamp.
        start: Timestamp,
    },
    /// The largest-deleted-timestamp watermark increased.
    WatermarkRaise {
        /// The new watermark.
        value: Timestamp,
    },
    /// Start of a half-aborted-set compaction snapshot.
    Snapshot {
        /// Generation of the compaction pass.
        generation: u64,
    },
}

impl LogRecord {
    /// Returns the record's type byte.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Self::TimestampAlloc { .. } => TIMESTAMP_ALLOC,
            Self::Commit { .. } => COMMIT,
            Self::Abort { .. } => ABORT,
            Self::FullAbort { .. } => FULL_ABORT,
            Self::WatermarkRaise { .. } => WATERMARK_RAISE,
            Self::Snapshot { .. } => SNAPSHOT,
        }
    }

    /// Encodes the record into the buffer.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.type_code());
        match self {
            Self::TimestampAlloc { max } => buf.put_u64(max.as_u64()),
            Self::Commit { start, commit } => {
                buf.put_u64(start.as_u64());
                buf.put_u64(commit.as_u64());
            }
            Self::Abort { start } | Self::FullAbort { start } => buf.put_u64(start.as_u64()),
            Self::WatermarkRaise { value } => buf.put_u64(value.as_u64()),
            Self::Snapshot { generation } => buf.put_u64(*generation),
        }
    }

    /// Encodes the record into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17);
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes one record from the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] on a truncated record or an
    /// unknown type byte.
    pub fn decode(buf: &mut impl Buf) -> CoreResult<Self> {
        let code = take_u8(buf)?;
        match code {
            TIMESTAMP_ALLOC => Ok(Self::TimestampAlloc {
                max: Timestamp::new(take_u64(buf)?),
            }),
            COMMIT => Ok(Self::Commit {
                start: Timestamp::new(take_u64(buf)?),
                commit: Timestamp::new(take_u64(buf)?),
            }),
            ABORT => Ok(Self::Abort {
                start: Timestamp::new(take_u64(buf)?),
            }),
            FULL_ABORT => Ok(Self::FullAbort {
                start: Timestamp::new(take_u64(buf)?),
            }),
            WATERMARK_RAISE => Ok(Self::WatermarkRaise {
                value: Timestamp::new(take_u64(buf)?),
            }),
            SNAPSHOT => Ok(Self::Snapshot {
                generation: take_u64(buf)?,
            }),
            _ => Err(CoreError::log_corruption(format!(
                "unknown record type {code:#04x}"
            ))),
        }
    }

    /// Decodes every record in a log byte run, in order.
    ///
    /// The replay component (and the replay tests) walk the log with
    /// this.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not contain a whole number of
    /// valid records.
    pub fn decode_all(mut bytes: &[u8]) -> CoreResult<Vec<Self>> {
        let mut records = Vec::new();
        while bytes.has_remaining() {
            records.push(Self::decode(&mut bytes)?);
        }
        Ok(records)
    }
}

fn take_u8(buf: &mut impl Buf) -> CoreResult<u8> {
    if buf.remaining() < 1 {
        return Err(CoreError::log_corruption("unexpected end of log"));
    }
    Ok(buf.get_u8())
}

fn take_u64(buf: &mut impl Buf) -> CoreResult<u64> {
    if buf.remaining() < 8 {
        return Err(CoreError::log_corruption("unexpected end of record"));
    }
    Ok(buf.get_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: u64) -> Timestamp {
        Timestamp::new(v)
    }

    #[test]
    fn record_roundtrips() {
        for record in [
            LogRecord::TimestampAlloc { max: ts(100_000) },
            LogRecord::Commit {
                start: ts(100),
                commit: ts(102),
            },
            LogRecord::Abort { start: ts(101) },
            LogRecord::FullAbort { start: ts(101) },
            LogRecord::WatermarkRaise { value: ts(50) },
            LogRecord::Snapshot { generation: 3 },
        ] {
            let buf = record.encode();
            let decoded = LogRecord::decode(&mut buf.as_slice()).unwrap();
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn commit_record_layout_is_stable() {
        // byte 0x02, then two big-endian u64s - the replay component
        // depends on this exact layout
        let buf = LogRecord::Commit {
            start: ts(0x0102),
            commit: ts(0x0304),
        }
        .encode();
        assert_eq!(buf.len(), 17);
        assert_eq!(buf[0], 0x02);
        assert_eq!(&buf[1..9], &0x0102u64.to_be_bytes());
        assert_eq!(&buf[9..17], &0x0304u64.to_be_bytes());
    }

    #[test]
    fn decode_all_walks_concatenated_batch() {
        let mut buf = Vec::new();
        LogRecord::Commit {
            start: ts(10),
            commit: ts(12),
        }
        .encode_into(&mut buf);
        LogRecord::Abort { start: ts(11) }.encode_into(&mut buf);
        LogRecord::WatermarkRaise { value: ts(11) }.encode_into(&mut buf);

        let records = LogRecord::decode_all(&buf).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], LogRecord::Abort { start: ts(11) });
    }

    #[test]
    fn snapshot_with_embedded_aborts_decodes_in_order() {
        let mut buf = Vec::new();
        LogRecord::Snapshot { generation: 1 }.encode_into(&mut buf);
        LogRecord::Abort { start: ts(7) }.encode_into(&mut buf);
        LogRecord::Abort { start: ts(9) }.encode_into(&mut buf);

        let records = LogRecord::decode_all(&buf).unwrap();
        assert_eq!(records[0], LogRecord::Snapshot { generation: 1 });
        assert_eq!(records[1], LogRecord::Abort { start: ts(7) });
        assert_eq!(records[2], LogRecord::Abort { start: ts(9) });
    }

    #[test]
    fn truncated_record_is_corruption() {
        let mut buf = LogRecord::Commit {
            start: ts(10),
            commit: ts(12),
        }
        .encode();
        buf.truncate(buf.len() - 4);

        assert!(matches!(
            LogRecord::decode_all(&buf),
            Err(CoreError::LogCorruption { .. })
        ));
    }

    #[test]
    fn unknown_type_is_corruption() {
        let buf = [0xEEu8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            LogRecord::decode(&mut buf.as_slice()),
            Err(CoreError::LogCorruption { .. })
        ));
    }
}
