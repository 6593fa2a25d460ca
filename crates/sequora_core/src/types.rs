//! Core type definitions for the sequencer.

use std::fmt;

/// A point in the sequencer's global order.
///
/// Timestamps are 64-bit, strictly increasing and never reused. A
/// transaction is identified by the timestamp issued when it began; once
/// it commits it also owns a commit timestamp, strictly greater than its
/// start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a timestamp from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the immediately following timestamp.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}

/// The hashed identity of a written cell, used for write-write conflict
/// detection.
///
/// The protocol crate derives these from full row identities; the core
/// only ever sees the fixed-width hash. Two distinct cells may alias to
/// the same key and then conflict spuriously - an accepted trade-off for
/// a bounded conflict table. The raw value 0 never occurs (it is the
/// empty-slot sentinel in the commit table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConflictKey(pub u64);

impl ConflictKey {
    /// Creates a conflict key from its raw hash value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw hash value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ordering() {
        let t1 = Timestamp::new(1);
        let t2 = Timestamp::new(2);
        assert!(t1 < t2);
    }

    #[test]
    fn timestamp_next() {
        let t = Timestamp::new(5);
        assert_eq!(t.next().as_u64(), 6);
    }

    #[test]
    fn timestamp_display() {
        assert_eq!(format!("{}", Timestamp::new(42)), "ts:42");
    }

    #[test]
    fn conflict_key_display_is_fixed_width() {
        assert_eq!(format!("{}", ConflictKey::new(0xAB)), "key:00000000000000ab");
    }
}
