//! Environment, store and maintenance configuration.

use crate::checkpoint::CheckpointOptions;
use crate::error::{CoreError, CoreResult};
use crate::transaction::RetryPolicy;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for opening an environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Whether to create the home directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Size at which the current log file is closed and a new one started.
    pub max_log_file_size: u64,

    /// How long a lock request may wait before failing with a conflict.
    /// `None` waits until granted or until a deadlock is detected.
    pub lock_timeout: Option<Duration>,

    /// Retry policy used by [`crate::Environment::with_retry`].
    pub retry: RetryPolicy,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            max_log_file_size: 10 * 1024 * 1024, // 10 MB
            lock_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl EnvConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the home directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the maximum log file size.
    #[must_use]
    pub const fn max_log_file_size(mut self, size: u64) -> Self {
        self.max_log_file_size = size;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// Byte-string comparison function for keys or duplicate values.
pub type Comparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// How a store organizes its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMethod {
    /// Keys in comparator order (bytewise unless a key comparator is set).
    BTree,
    /// Keys in hash order; only exact lookups and full scans are meaningful.
    Hash,
    /// Keys are 1-based record numbers.
    Recno,
}

impl AccessMethod {
    pub(crate) const fn as_byte(self) -> u8 {
        match self {
            Self::BTree => 1,
            Self::Hash => 2,
            Self::Recno => 3,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::BTree),
            2 => Some(Self::Hash),
            3 => Some(Self::Recno),
            _ => None,
        }
    }
}

/// Duplicate handling of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Duplicates {
    /// One value per key.
    #[default]
    None,
    /// Several values per key, in insertion position order.
    Unsorted,
    /// Several values per key, ordered by the duplicate comparator
    /// (bytewise unless one is set). Identical pairs are rejected.
    Sorted,
}

impl Duplicates {
    /// Returns true if a key may hold more than one value.
    #[must_use]
    pub const fn enabled(self) -> bool {
        !matches!(self, Self::None)
    }

    pub(crate) const fn as_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Unsorted => 1,
            Self::Sorted => 2,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Unsorted),
            2 => Some(Self::Sorted),
            _ => None,
        }
    }
}

/// Configuration for opening a record store.
#[derive(Clone)]
pub struct StoreConfig {
    /// Access method.
    pub access: AccessMethod,
    /// Whether to create the store if the catalog does not know it.
    pub create: bool,
    /// Duplicate handling.
    pub duplicates: Duplicates,
    /// Order of sorted duplicates.
    pub dup_compare: Option<Comparator>,
    /// Key order of a B-tree store.
    pub key_compare: Option<Comparator>,
    /// Whether a B-tree store supports positioning by record number.
    pub record_numbers: bool,
    /// Page size hint. Accepted for compatibility; pages are not modelled.
    pub page_size: Option<u32>,
    /// Fixed value length of a Recno store.
    pub fixed_length: Option<usize>,
    /// Byte used to pad short fixed-length values.
    pub pad_byte: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            access: AccessMethod::BTree,
            create: true,
            duplicates: Duplicates::None,
            dup_compare: None,
            key_compare: None,
            record_numbers: false,
            page_size: None,
            fixed_length: None,
            pad_byte: b' ',
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("access", &self.access)
            .field("create", &self.create)
            .field("duplicates", &self.duplicates)
            .field("dup_compare", &self.dup_compare.is_some())
            .field("key_compare", &self.key_compare.is_some())
            .field("record_numbers", &self.record_numbers)
            .field("page_size", &self.page_size)
            .field("fixed_length", &self.fixed_length)
            .field("pad_byte", &self.pad_byte)
            .finish()
    }
}

impl StoreConfig {
    /// B-tree store with default options.
    #[must_use]
    pub fn btree() -> Self {
        Self::default()
    }

    /// Hash store with default options.
    #[must_use]
    pub fn hash() -> Self {
        Self {
            access: AccessMethod::Hash,
            ..Self::default()
        }
    }

    /// Record-number store with default options.
    #[must_use]
    pub fn recno() -> Self {
        Self {
            access: AccessMethod::Recno,
            ..Self::default()
        }
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub fn create(mut self, value: bool) -> Self {
        self.create = value;
        self
    }

    /// Sets duplicate handling.
    #[must_use]
    pub fn duplicates(mut self, duplicates: Duplicates) -> Self {
        self.duplicates = duplicates;
        self
    }

    /// Sets the sorted-duplicate comparator.
    #[must_use]
    pub fn dup_compare(
        mut self,
        compare: impl Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.dup_compare = Some(Arc::new(compare));
        self
    }

    /// Sets the B-tree key comparator.
    #[must_use]
    pub fn key_compare(
        mut self,
        compare: impl Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.key_compare = Some(Arc::new(compare));
        self
    }

    /// Enables positioning by record number on a B-tree store.
    #[must_use]
    pub fn record_numbers(mut self, value: bool) -> Self {
        self.record_numbers = value;
        self
    }

    /// Sets the page size hint.
    #[must_use]
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Makes a Recno store hold fixed-length values padded with `pad`.
    #[must_use]
    pub fn fixed_length(mut self, len: usize, pad: u8) -> Self {
        self.fixed_length = Some(len);
        self.pad_byte = pad;
        self
    }

    /// Returns true if the store addresses records by number.
    #[must_use]
    pub fn has_record_numbers(&self) -> bool {
        self.access == AccessMethod::Recno || self.record_numbers
    }

    /// Checks the options for inconsistencies.
    pub fn validate(&self) -> CoreResult<()> {
        if self.dup_compare.is_some() && self.duplicates != Duplicates::Sorted {
            return Err(CoreError::config(
                "a duplicate comparator requires sorted duplicates",
            ));
        }
        if self.key_compare.is_some() && self.access != AccessMethod::BTree {
            return Err(CoreError::config(
                "a key comparator is only supported by btree stores",
            ));
        }
        if self.record_numbers && self.access != AccessMethod::BTree {
            return Err(CoreError::config(
                "record numbers are only configurable on btree stores",
            ));
        }
        if self.access == AccessMethod::Recno && self.duplicates.enabled() {
            return Err(CoreError::config("recno stores do not support duplicates"));
        }
        if self.fixed_length.is_some() && self.access != AccessMethod::Recno {
            return Err(CoreError::config(
                "fixed-length records are only supported by recno stores",
            ));
        }
        if let Some(size) = self.page_size {
            if !(512..=65536).contains(&size) || !size.is_power_of_two() {
                return Err(CoreError::config(format!(
                    "page size {size} must be a power of two between 512 and 65536"
                )));
            }
        }
        Ok(())
    }

    /// Checks `self` against the configuration a store is already open
    /// with.
    ///
    /// Comparator functions cannot be compared, so only whether each one is
    /// set has to agree.
    pub(crate) fn check_reopen(&self, name: &str, open: &Self) -> CoreResult<()> {
        let conflict = if self.key_compare.is_some() != open.key_compare.is_some() {
            Some("key comparator")
        } else if self.dup_compare.is_some() != open.dup_compare.is_some() {
            Some("duplicate comparator")
        } else if self.fixed_length.is_some() && self.pad_byte != open.pad_byte {
            Some("pad byte")
        } else {
            None
        };
        match conflict {
            Some(option) => Err(CoreError::config(format!(
                "store {name} is already open with a different {option}"
            ))),
            None => Ok(()),
        }
    }
}

/// Configuration of the background maintenance tasks.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Time between checkpoint attempts.
    pub checkpoint_interval: Duration,
    /// Thresholds passed to each checkpoint attempt.
    pub checkpoint: CheckpointOptions,
    /// Time between log reclamation passes.
    pub reclaim_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(60),
            checkpoint: CheckpointOptions::default(),
            reclaim_interval: Duration::from_secs(300),
        }
    }
}

impl MaintenanceConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the checkpoint interval.
    #[must_use]
    pub const fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Sets the checkpoint thresholds.
    #[must_use]
    pub const fn checkpoint(mut self, options: CheckpointOptions) -> Self {
        self.checkpoint = options;
        self
    }

    /// Sets the log reclamation interval.
    #[must_use]
    pub const fn reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EnvConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert!(config.lock_timeout.is_none());
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn builder_pattern() {
        let config = EnvConfig::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .max_log_file_size(1024)
            .lock_timeout(Some(Duration::from_millis(50)));

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.max_log_file_size, 1024);
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn store_validation() {
        assert!(StoreConfig::btree().validate().is_ok());
        assert!(StoreConfig::btree()
            .duplicates(Duplicates::Sorted)
            .dup_compare(|a, b| b.cmp(a))
            .validate()
            .is_ok());
        assert!(StoreConfig::btree()
            .dup_compare(|a, b| a.cmp(b))
            .validate()
            .is_err());
        assert!(StoreConfig::hash().record_numbers(true).validate().is_err());
        assert!(StoreConfig::btree().fixed_length(8, 0).validate().is_err());
        assert!(StoreConfig::recno()
            .duplicates(Duplicates::Unsorted)
            .validate()
            .is_err());
        assert!(StoreConfig::btree().page_size(1000).validate().is_err());
        assert!(StoreConfig::btree().page_size(4096).validate().is_ok());
    }

    #[test]
    fn maintenance_defaults() {
        let config = MaintenanceConfig::default();
        assert_eq!(config.checkpoint_interval, Duration::from_secs(60));
        assert_eq!(config.reclaim_interval, Duration::from_secs(300));
    }
}
