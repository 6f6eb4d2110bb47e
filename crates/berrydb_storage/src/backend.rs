//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A low-level append-only byte store.
///
/// Backends are **opaque byte stores**. BerryDB owns all format
/// interpretation; a backend never parses log records or checkpoint images.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes appended data to the operating system
/// - `sync` makes appended data durable
/// - Backends must be `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes pending writes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is also the offset of the
    /// next `append`.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to cut a torn record off the tail of a log file during recovery.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole content of the storage.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            StorageError::Corrupted(format!("storage too large to read: {size} bytes"))
        })?;
        self.read_at(0, len)
    }
}

/// Fails with `ReadPastEnd` unless `offset..offset + len` lies within `size`.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> StorageResult<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::ReadPastEnd { offset, len, size }),
    }
}

/// Fails with `InvalidTruncate` if `new_size` would grow the storage.
pub(crate) fn check_truncate(new_size: u64, size: u64) -> StorageResult<()> {
    if new_size > size {
        return Err(StorageError::InvalidTruncate { new_size, size });
    }
    Ok(())
}
