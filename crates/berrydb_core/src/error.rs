//! Error types for BerryDB core.

use crate::types::TransactionId;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a lock request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Granting the request would have closed a cycle of waiting transactions.
    Deadlock,
    /// The request waited longer than the configured lock timeout.
    Timeout,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deadlock => f.write_str("deadlock"),
            Self::Timeout => f.write_str("lock timeout"),
        }
    }
}

/// Coarse classification of a [`CoreError`].
///
/// Callers branch on the kind rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operation required an item that does not exist.
    NotFound,
    /// An exclusive insert found the key (or key/value pair) already present.
    KeyExists,
    /// Contention with another transaction; the attempt must be retried from
    /// a fresh transaction.
    LockConflict,
    /// Store or association misconfiguration.
    Config,
    /// A bulk buffer cannot hold even one record.
    BufferTooSmall,
    /// The API was used in a way the current state does not allow.
    InvalidOperation,
    /// Environment or I/O failure; never retried automatically.
    Fatal,
}

/// Errors that can occur in BerryDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] berrydb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A required item does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// The key (or key/value pair) already exists.
    #[error("key already exists in store {store}")]
    KeyExists {
        /// Name of the store.
        store: String,
    },

    /// A lock request conflicted with another transaction.
    #[error("lock conflict for {txn} on {resource}: {reason}")]
    LockConflict {
        /// The transaction whose request was refused.
        txn: TransactionId,
        /// Human-readable description of the contended resource.
        resource: String,
        /// Why the request was refused.
        reason: ConflictReason,
    },

    /// Store or association misconfiguration.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A bulk retrieval buffer cannot hold a single record.
    #[error("buffer too small: record needs {needed} bytes, buffer holds {capacity}")]
    BufferTooSmall {
        /// Bytes needed for the next record.
        needed: usize,
        /// Capacity of the buffer supplied.
        capacity: usize,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The log is corrupted or invalid.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid file format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Another process holds the environment lock.
    #[error("environment locked: another process has exclusive access")]
    EnvironmentLocked,

    /// A log file expected by the caller does not exist.
    #[error("log file missing: {}", path.display())]
    LogFileMissing {
        /// Path of the missing file.
        path: PathBuf,
    },
}

impl CoreError {
    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::KeyExists { .. } => ErrorKind::KeyExists,
            Self::LockConflict { .. } => ErrorKind::LockConflict,
            Self::Config { .. } => ErrorKind::Config,
            Self::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            Self::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            Self::Storage(_)
            | Self::Io(_)
            | Self::LogCorruption { .. }
            | Self::ChecksumMismatch { .. }
            | Self::InvalidFormat { .. }
            | Self::EnvironmentLocked
            | Self::LogFileMissing { .. } => ErrorKind::Fatal,
        }
    }

    /// Returns true if the failed attempt should be retried from a fresh
    /// transaction. Only lock conflicts qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::LockConflict
    }

    /// Returns true for environment failures the core never recovers from.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a key-exists error.
    pub fn key_exists(store: impl Into<String>) -> Self {
        Self::KeyExists {
            store: store.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}

/// Combines an operation result with the result of its cleanup step.
///
/// The first error wins: a cleanup failure is reported only when the
/// operation itself succeeded. A cleanup failure that is shadowed by an
/// earlier error is logged so it is not lost entirely.
pub fn first_error<T>(result: CoreResult<T>, cleanup: CoreResult<()>) -> CoreResult<T> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            tracing::warn!(error = %cleanup_err, "cleanup failed while propagating an earlier error");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lock_conflicts_are_retryable() {
        let conflict = CoreError::LockConflict {
            txn: TransactionId::new(3),
            resource: "store:1 key 6b".into(),
            reason: ConflictReason::Deadlock,
        };
        assert!(conflict.is_retryable());
        assert!(!CoreError::key_exists("students").is_retryable());
        assert!(!CoreError::log_corruption("bad magic").is_retryable());
        assert!(CoreError::log_corruption("bad magic").is_fatal());
    }

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(CoreError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(CoreError::config("x").kind(), ErrorKind::Config);
        assert_eq!(
            CoreError::BufferTooSmall {
                needed: 10,
                capacity: 4
            }
            .kind(),
            ErrorKind::BufferTooSmall
        );
        assert_eq!(CoreError::EnvironmentLocked.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn first_error_keeps_the_earliest_failure() {
        let op: CoreResult<()> = Err(CoreError::key_exists("a"));
        let cleanup: CoreResult<()> = Err(CoreError::invalid_operation("close"));
        let err = first_error(op, cleanup).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyExists);

        let cleanup: CoreResult<()> = Err(CoreError::invalid_operation("close"));
        let err = first_error(Ok(5), cleanup).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);

        assert_eq!(first_error(Ok(5), Ok(())).unwrap(), 5);
    }
}
