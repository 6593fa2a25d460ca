//! Row identity and conflict-key derivation.

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{take_bytes, take_u16};
use bytes::{Buf, BufMut};
use sha2::{Digest, Sha256};

/// Maximum length of a single row-key component.
pub const MAX_COMPONENT_LEN: usize = u16::MAX as usize;

/// The identity of a written cell: table, row, column family and qualifier.
///
/// Clients attach one `RowKey` per written cell to a commit request. The
/// sequencer never stores the full identity; it collapses each key to a
/// fixed-width [conflict key](RowKey::conflict_key) before conflict
/// checking. Collapsing is a deliberate trade-off: the conflict table stays
/// bounded, but two distinct cells whose keys alias must be treated as
/// conflicting (a spurious abort, never a missed conflict).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    /// Table identifier bytes.
    pub table: Vec<u8>,
    /// Row identifier bytes.
    pub row: Vec<u8>,
    /// Column family bytes.
    pub family: Vec<u8>,
    /// Column qualifier bytes.
    pub qualifier: Vec<u8>,
}

impl RowKey {
    /// Creates a row key from its four components.
    pub fn new(
        table: impl Into<Vec<u8>>,
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            table: table.into(),
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    /// Derives the 64-bit conflict key for this cell.
    ///
    /// SHA-256 over the four length-delimited components, truncated to the
    /// first 8 bytes (big-endian). Length delimiting keeps concatenation
    /// ambiguity out of the digest: `("ab", "c")` and `("a", "bc")` hash
    /// differently.
    ///
    /// The value 0 is reserved as the "no committer recorded" sentinel in
    /// the commit table, so a digest that truncates to 0 maps to 1.
    #[must_use]
    pub fn conflict_key(&self) -> u64 {
        let mut hasher = Sha256::new();
        for part in [&self.table, &self.row, &self.family, &self.qualifier] {
            hasher.update((part.len() as u32).to_be_bytes());
            hasher.update(part);
        }
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let key = u64::from_be_bytes(prefix);

        if key == 0 {
            1
        } else {
            key
        }
    }

    /// Encodes the row key into the buffer.
    ///
    /// Each component is a `u16` length followed by its bytes; callers
    /// building keys from untrusted input run [`validate`](Self::validate)
    /// first.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        for part in [&self.table, &self.row, &self.family, &self.qualifier] {
            debug_assert!(part.len() <= MAX_COMPONENT_LEN);
            buf.put_u16(part.len() as u16);
            buf.put_slice(part);
        }
    }

    /// Decodes a row key from the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated.
    pub fn decode(buf: &mut impl Buf) -> ProtocolResult<Self> {
        let len = take_u16(buf)? as usize;
        let table = take_bytes(buf, len)?;
        let len = take_u16(buf)? as usize;
        let row = take_bytes(buf, len)?;
        let len = take_u16(buf)? as usize;
        let family = take_bytes(buf, len)?;
        let len = take_u16(buf)? as usize;
        let qualifier = take_bytes(buf, len)?;

        Ok(Self {
            table,
            row,
            family,
            qualifier,
        })
    }

    /// Validates component lengths before encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if any component exceeds [`MAX_COMPONENT_LEN`].
    pub fn validate(&self) -> ProtocolResult<()> {
        for part in [&self.table, &self.row, &self.family, &self.qualifier] {
            if part.len() > MAX_COMPONENT_LEN {
                return Err(ProtocolError::FieldTooLarge {
                    len: part.len(),
                    max: MAX_COMPONENT_LEN,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn conflict_key_is_deterministic() {
        let a = RowKey::new("accounts", "row-17", "data", "balance");
        let b = RowKey::new("accounts", "row-17", "data", "balance");
        assert_eq!(a.conflict_key(), b.conflict_key());
    }

    #[test]
    fn conflict_key_distinguishes_cells() {
        let a = RowKey::new("accounts", "row-17", "data", "balance");
        let b = RowKey::new("accounts", "row-18", "data", "balance");
        assert_ne!(a.conflict_key(), b.conflict_key());
    }

    #[test]
    fn conflict_key_is_not_concatenation_sensitive() {
        let a = RowKey::new("ab", "c", "", "");
        let b = RowKey::new("a", "bc", "", "");
        assert_ne!(a.conflict_key(), b.conflict_key());
    }

    #[test]
    fn conflict_key_never_zero() {
        // 0 is the empty-slot sentinel; the derivation remaps it
        let key = RowKey::new("t", "r", "f", "q").conflict_key();
        assert_ne!(key, 0);
    }

    #[test]
    fn roundtrip() {
        let key = RowKey::new("users", "alice", "cf", "email");
        let mut buf = Vec::new();
        key.encode_into(&mut buf);
        let decoded = RowKey::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn decode_truncated_fails() {
        let key = RowKey::new("users", "alice", "cf", "email");
        let mut buf = Vec::new();
        key.encode_into(&mut buf);
        buf.truncate(buf.len() - 3);
        assert!(RowKey::decode(&mut buf.as_slice()).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary(
            table in proptest::collection::vec(any::<u8>(), 0..64),
            row in proptest::collection::vec(any::<u8>(), 0..64),
            family in proptest::collection::vec(any::<u8>(), 0..16),
            qualifier in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            let key = RowKey::new(table, row, family, qualifier);
            let mut buf = Vec::new();
            key.encode_into(&mut buf);
            let decoded = RowKey::decode(&mut buf.as_slice()).unwrap();
            prop_assert_eq!(decoded, key);
        }
    }
}
