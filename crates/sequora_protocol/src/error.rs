//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding protocol bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input ended before the message was complete.
    #[error("truncated message: needed {needed} more bytes")]
    Truncated {
        /// How many additional bytes the decoder required.
        needed: usize,
    },

    /// The leading type byte does not name a known message or event.
    #[error("unknown type code: {code:#04x}")]
    UnknownType {
        /// The unrecognized type byte.
        code: u8,
    },

    /// A length-delimited field exceeds the protocol bound.
    #[error("field too large: {len} bytes exceeds maximum of {max}")]
    FieldTooLarge {
        /// Declared field length.
        len: usize,
        /// Maximum permitted length.
        max: usize,
    },
}
