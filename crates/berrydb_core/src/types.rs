//! Core type definitions for BerryDB.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within one
/// environment lifetime; recovery resumes numbering after the highest logged
/// ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Sequence number for ordering commits.
///
/// Every top-level commit that wrote something gets the next sequence
/// number. Checkpoint images record the sequence they include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identifier for a record store.
///
/// Store IDs are assigned by the environment catalog when a store is first
/// created and stay stable across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub u32);

impl StoreId {
    /// Creates a new store ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store:{}", self.0)
    }
}

/// Log sequence number: a position in the write-ahead log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn {
    /// Log file number (starting at 1).
    pub file: u32,
    /// Byte offset inside the log file.
    pub offset: u64,
}

impl Lsn {
    /// Creates a new log position.
    #[must_use]
    pub const fn new(file: u32, offset: u64) -> Self {
        Self { file, offset }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file, self.offset)
    }
}

/// Logical record number of a Recno store, or of a B-tree store with
/// record numbers enabled. Record numbers start at 1.
pub type RecordNumber = u32;

/// Encodes a record number as a Recno store key (4 bytes, big-endian).
///
/// Big-endian keys sort bytewise in numeric order.
#[must_use]
pub fn recno_key(recno: RecordNumber) -> Vec<u8> {
    recno.to_be_bytes().to_vec()
}

/// Decodes a Recno store key.
///
/// Returns `None` if the key is not exactly 4 bytes.
#[must_use]
pub fn key_recno(key: &[u8]) -> Option<RecordNumber> {
    let bytes: [u8; 4] = key.try_into().ok()?;
    Some(RecordNumber::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        assert!(TransactionId::new(1) < TransactionId::new(2));
    }

    #[test]
    fn sequence_number_next() {
        assert_eq!(SequenceNumber::new(5).next().as_u64(), 6);
    }

    #[test]
    fn store_id_display() {
        assert_eq!(format!("{}", StoreId::new(42)), "store:42");
    }

    #[test]
    fn lsn_orders_by_file_then_offset() {
        assert!(Lsn::new(1, 900) < Lsn::new(2, 0));
        assert!(Lsn::new(2, 10) < Lsn::new(2, 11));
    }

    #[test]
    fn recno_keys_sort_numerically() {
        assert!(recno_key(2) < recno_key(10));
        assert!(recno_key(255) < recno_key(256));
        assert_eq!(key_recno(&recno_key(77)), Some(77));
        assert_eq!(key_recno(b"abc"), None);
    }
}
