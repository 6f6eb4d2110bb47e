//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Truncation would grow the storage.
    #[error("cannot truncate to {new_size} bytes, current size is {size}")]
    InvalidTruncate {
        /// The requested size.
        new_size: u64,
        /// The current storage size.
        size: u64,
    },

    /// A named file does not exist in the file set.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A file name is not acceptable to the file set.
    #[error("invalid file name: {0}")]
    InvalidName(String),

    /// The stored bytes are unusable.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
