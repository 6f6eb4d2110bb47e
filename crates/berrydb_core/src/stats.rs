//! Environment statistics.
//!
//! All counters are atomic and can be read while operations are in progress.
//!
//! ```rust
//! use berrydb_core::{EnvConfig, Environment};
//!
//! let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
//! let txn = env.begin(None).unwrap();
//! txn.commit().unwrap();
//!
//! let stats = env.stats();
//! assert_eq!(stats.transactions_committed, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Environment statistics and counters.
#[derive(Debug, Default)]
pub struct EnvStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    bulk_batches: AtomicU64,

    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,

    lock_waits: AtomicU64,
    deadlocks: AtomicU64,
    lock_timeouts: AtomicU64,
    retries: AtomicU64,

    checkpoints: AtomicU64,
    log_files_removed: AtomicU64,
}

impl EnvStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bulk_batch(&self) {
        self.bulk_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_wait(&self) {
        self.lock_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_log_file_removed(&self) {
        self.log_files_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of read operations.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the total number of put operations.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the total number of delete operations.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the total number of lock requests that had to wait.
    pub fn lock_waits(&self) -> u64 {
        self.lock_waits.load(Ordering::Relaxed)
    }

    /// Returns the total number of deadlocks detected.
    pub fn deadlocks(&self) -> u64 {
        self.deadlocks.load(Ordering::Relaxed)
    }

    /// Returns the total number of retried transaction attempts.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Returns the total number of checkpoints taken.
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads(),
            writes: self.writes(),
            deletes: self.deletes(),
            bulk_batches: self.bulk_batches.load(Ordering::Relaxed),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            lock_waits: self.lock_waits(),
            deadlocks: self.deadlocks(),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            retries: self.retries(),
            checkpoints: self.checkpoints(),
            log_files_removed: self.log_files_removed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of environment statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total number of read operations.
    pub reads: u64,
    /// Total number of put operations.
    pub writes: u64,
    /// Total number of delete operations.
    pub deletes: u64,
    /// Total number of bulk batches returned.
    pub bulk_batches: u64,
    /// Total number of transactions started.
    pub transactions_started: u64,
    /// Total number of transactions committed.
    pub transactions_committed: u64,
    /// Total number of transactions aborted.
    pub transactions_aborted: u64,
    /// Lock requests that had to wait.
    pub lock_waits: u64,
    /// Lock requests refused to break a deadlock.
    pub deadlocks: u64,
    /// Lock requests refused after the lock timeout.
    pub lock_timeouts: u64,
    /// Attempts retried by the retry combinator.
    pub retries: u64,
    /// Checkpoints taken.
    pub checkpoints: u64,
    /// Log files removed.
    pub log_files_removed: u64,
}
