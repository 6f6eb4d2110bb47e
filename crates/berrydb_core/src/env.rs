//! The environment: the shared home of stores, locks, log and transactions.

use crate::checkpoint::{ArchiveMode, CheckpointInfo, CheckpointOptions, StoreImage};
use crate::config::{EnvConfig, StoreConfig};
use crate::dir::EnvHome;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockManager;
use crate::log::{list_log_files, log_file_name, parse_log_file_name, LogFileReader, LogManager, LogRecord};
use crate::manifest::Manifest;
use crate::secondary::{self, Extractor};
use crate::stats::{EnvStats, StatsSnapshot};
use crate::store::{Store, StoreInner, StoreRegistry};
use crate::transaction::{retry, RecoveredState, RetryPolicy, Transaction, TransactionManager};
use crate::types::{StoreId, TransactionId};
use berrydb_storage::FileSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// State shared by every handle of one environment.
pub(crate) struct EnvShared {
    pub(crate) config: EnvConfig,
    pub(crate) home: EnvHome,
    pub(crate) catalog: Mutex<Manifest>,
    pub(crate) stores: StoreRegistry,
    pub(crate) locks: LockManager,
    pub(crate) txns: TransactionManager,
    pub(crate) stats: EnvStats,
}

/// A BerryDB environment.
///
/// `Environment` is a cheap handle: clones share the same stores, lock table,
/// log and statistics, and can be moved freely between threads.
///
/// # Example
///
/// ```rust
/// use berrydb_core::{EnvConfig, Environment, PutFlags, StoreConfig};
///
/// let env = Environment::open_in_memory(EnvConfig::default())?;
/// let store = env.open_store("users", StoreConfig::btree())?;
///
/// env.with_retry(|txn| store.put(Some(txn), b"alice", b"admin", PutFlags::Replace))?;
/// assert_eq!(store.get(None, b"alice")?, Some(b"admin".to_vec()));
/// # Ok::<(), berrydb_core::CoreError>(())
/// ```
#[derive(Clone)]
pub struct Environment {
    shared: Arc<EnvShared>,
}

impl Environment {
    /// Opens (or creates) a directory-backed environment.
    ///
    /// Takes the exclusive `LOCK` file, loads the store catalog and recovers
    /// the committed state from the latest checkpoint image and the log.
    ///
    /// # Errors
    ///
    /// - `EnvironmentLocked` if another process has the environment open
    /// - `LogFileMissing` if a log file recovery needs was removed
    /// - `LogCorruption` / `ChecksumMismatch` for damaged files
    pub fn open(path: impl AsRef<Path>, config: EnvConfig) -> CoreResult<Self> {
        let home = EnvHome::open(path.as_ref(), config.create_if_missing)?;
        Self::from_home(home, config)
    }

    /// Creates an environment that keeps its files in memory.
    pub fn open_in_memory(config: EnvConfig) -> CoreResult<Self> {
        Self::from_home(EnvHome::in_memory(), config)
    }

    fn from_home(home: EnvHome, config: EnvConfig) -> CoreResult<Self> {
        let catalog = home.load_manifest()?.unwrap_or_else(Manifest::new);
        let recovered = recover(&home, &config)?;
        let txns = TransactionManager::new(recovered.log, recovered.state, config.sync_on_commit);

        let shared = EnvShared {
            locks: LockManager::new(config.lock_timeout),
            stores: StoreRegistry::with_pending(recovered.stores),
            catalog: Mutex::new(catalog),
            txns,
            stats: EnvStats::new(),
            home,
            config,
        };
        tracing::info!(
            home = ?shared.home.root(),
            stores = shared.catalog.lock().stores.len(),
            "environment opened"
        );
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Returns the home directory, or `None` for in-memory environments.
    #[must_use]
    pub fn home(&self) -> Option<&Path> {
        self.shared.home.root()
    }

    /// Returns the configuration the environment was opened with.
    #[must_use]
    pub fn config(&self) -> &EnvConfig {
        &self.shared.config
    }

    /// Opens a store, creating it in the catalog if allowed.
    ///
    /// Opening a store that is already open returns a handle to the same
    /// store; the new configuration must agree with the one it is open with.
    ///
    /// # Errors
    ///
    /// - `Config` if the options are inconsistent or conflict with the
    ///   catalog entry
    /// - `NotFound` if the store does not exist and `create` is false
    pub fn open_store(&self, name: &str, config: StoreConfig) -> CoreResult<Store> {
        config.validate()?;
        let mut catalog = self.shared.catalog.lock();
        let mut updated = catalog.clone();
        let (entry, created) = updated.resolve(name, &config)?;
        if created {
            self.shared.home.save_manifest(&updated)?;
            *catalog = updated;
            tracing::info!(store = name, id = %entry.id, access = ?config.access, "store created");
        }

        let inner = match self.shared.stores.get(entry.id) {
            Some(inner) => {
                config.check_reopen(name, &inner.config)?;
                inner
            }
            None => {
                let image = self.shared.stores.take_pending(entry.id);
                let inner = Arc::new(StoreInner::new(entry.id, name, config, image));
                self.shared.stores.insert(Arc::clone(&inner));
                tracing::debug!(store = name, id = %entry.id, "store opened");
                inner
            }
        };
        Ok(Store {
            inner,
            env: Arc::clone(&self.shared),
        })
    }

    /// Makes `secondary` an index of `primary`, keyed by `extractor`.
    ///
    /// An empty secondary is populated from the primary's committed records.
    ///
    /// # Errors
    ///
    /// `Config` if the stores are the same, the primary has duplicates or is
    /// itself a secondary, or the secondary is already associated.
    pub fn associate(&self, primary: &Store, secondary: &Store, extractor: Extractor) -> CoreResult<()> {
        secondary::associate(&self.shared, primary, secondary, extractor)
    }

    /// Begins a transaction, nested in `parent` if given.
    pub fn begin<'p>(&self, parent: Option<&'p Transaction<'p>>) -> CoreResult<Transaction<'p>> {
        Transaction::begin(&self.shared, parent)
    }

    /// Runs `body` in a fresh transaction and commits it, retrying the whole
    /// transaction on lock conflicts as the environment's retry policy allows.
    pub fn with_retry<T, F>(&self, body: F) -> CoreResult<T>
    where
        F: FnMut(&Transaction<'_>) -> CoreResult<T>,
    {
        retry::run(&self.shared, &self.shared.config.retry, body)
    }

    /// Like [`Environment::with_retry`] with an explicit policy.
    pub fn with_retry_policy<T, F>(&self, policy: &RetryPolicy, body: F) -> CoreResult<T>
    where
        F: FnMut(&Transaction<'_>) -> CoreResult<T>,
    {
        retry::run(&self.shared, policy, body)
    }

    /// Takes a checkpoint if `options` call for one.
    ///
    /// Returns `None` when the thresholds were not met.
    pub fn checkpoint(&self, options: &CheckpointOptions) -> CoreResult<Option<CheckpointInfo>> {
        self.shared.txns.checkpoint(&self.shared, options)
    }

    /// Lists log files no longer needed for recovery, oldest first.
    pub fn log_archive(&self, mode: ArchiveMode) -> CoreResult<Vec<PathBuf>> {
        let start_file = self.shared.txns.checkpoint_start_file();
        let files = self.shared.home.files();
        let archivable: Vec<PathBuf> = list_log_files(files.as_ref())?
            .into_iter()
            .filter(|number| *number < start_file)
            .map(|number| {
                let name = log_file_name(number);
                match mode {
                    ArchiveMode::Relative => PathBuf::from(name),
                    ArchiveMode::Absolute => files.path(&name),
                }
            })
            .collect();
        if !archivable.is_empty() {
            tracing::info!(files = archivable.len(), start_file, "log files archivable");
        }
        Ok(archivable)
    }

    /// Removes a log file listed by [`Environment::log_archive`].
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the path is not a log file or the file is still
    ///   needed for recovery
    /// - `LogFileMissing` if the file does not exist
    pub fn remove_log_file(&self, path: &Path) -> CoreResult<()> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CoreError::invalid_operation(format!("not a log file: {}", path.display())))?;
        let number = parse_log_file_name(name)
            .ok_or_else(|| CoreError::invalid_operation(format!("not a log file: {}", path.display())))?;

        let start_file = self.shared.txns.checkpoint_start_file();
        if number >= start_file || number >= self.shared.txns.current_log_file() {
            return Err(CoreError::invalid_operation(format!(
                "log file {name} is still needed for recovery"
            )));
        }
        let files = self.shared.home.files();
        if !files.exists(name) {
            return Err(CoreError::LogFileMissing {
                path: path.to_path_buf(),
            });
        }
        files.remove(name)?;
        self.shared.stats.record_log_file_removed();
        tracing::info!(file = name, "log file removed");
        Ok(())
    }

    /// Returns a snapshot of the environment statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of locks `txn` holds.
    #[must_use]
    pub fn lock_count(&self, txn: TransactionId) -> usize {
        self.shared.locks.held_count(txn)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("home", &self.shared.home.root())
            .field("txns", &self.shared.txns)
            .finish_non_exhaustive()
    }
}

struct Recovered {
    log: LogManager,
    state: RecoveredState,
    stores: HashMap<StoreId, StoreImage>,
}

/// Rebuilds the committed state from the checkpoint image and the log files
/// written after it.
///
/// Only transactions whose commit record made it to the log are replayed. A
/// torn tail of the last log file, including records of a transaction that
/// never committed, is cut off so new commits follow the last valid one.
fn recover(home: &EnvHome, config: &EnvConfig) -> CoreResult<Recovered> {
    let files = home.files();
    let image = home.load_checkpoint()?;

    let mut state = RecoveredState::default();
    let mut stores: HashMap<StoreId, HashMap<Vec<u8>, Vec<Vec<u8>>>> = HashMap::new();
    let first_file = match &image {
        Some(image) => {
            state.last_txid = image.last_txid;
            state.last_sequence = image.sequence.as_u64();
            state.checkpoint_start_file = image.start_file;
            for (id, entries) in &image.stores {
                stores.insert(*id, entries.iter().cloned().collect());
            }
            image.start_file
        }
        None => 1,
    };
    let checkpoint_sequence = state.last_sequence;

    let numbers: Vec<u32> = list_log_files(files.as_ref())?
        .into_iter()
        .filter(|number| *number >= first_file)
        .collect();
    let mut expected = first_file;
    for number in &numbers {
        if *number != expected {
            return Err(CoreError::LogFileMissing {
                path: files.path(&log_file_name(expected)),
            });
        }
        expected += 1;
    }
    if image.is_some() && numbers.is_empty() {
        return Err(CoreError::LogFileMissing {
            path: files.path(&log_file_name(first_file)),
        });
    }

    let mut pending: HashMap<TransactionId, Vec<LogRecord>> = HashMap::new();
    let mut replayed = 0usize;
    let mut logged = 0u64;
    for (i, number) in numbers.iter().enumerate() {
        let name = log_file_name(*number);
        let data = files.read(&name)?.unwrap_or_default();
        let is_last = i + 1 == numbers.len();

        let mut reader = LogFileReader::new(&data);
        let mut settled = 0u64;
        while let Some(item) = reader.next() {
            let (_, record) = item?;
            state.last_txid = state.last_txid.max(record.txid().map_or(0, TransactionId::as_u64));
            match record {
                LogRecord::Put { txid, .. } | LogRecord::Delete { txid, .. } => {
                    pending.entry(txid).or_default().push(record);
                }
                LogRecord::Commit { txid, sequence } => {
                    let records = pending.remove(&txid).unwrap_or_default();
                    if sequence.as_u64() > checkpoint_sequence {
                        replay(&mut stores, records);
                        replayed += 1;
                    }
                    state.last_sequence = state.last_sequence.max(sequence.as_u64());
                    settled = reader.valid_len();
                }
                LogRecord::Checkpoint { .. } => settled = reader.valid_len(),
            }
        }

        let len = data.len() as u64;
        if is_last && settled < len {
            let mut backend = files.open(&name)?;
            backend.truncate(settled)?;
            backend.sync()?;
            tracing::warn!(
                file = %name,
                kept = settled,
                dropped = len - settled,
                "truncated incomplete tail of log"
            );
            logged += settled;
        } else if reader.is_torn() {
            return Err(CoreError::log_corruption(format!(
                "log file {name} ends in an incomplete record"
            )));
        } else {
            logged += len;
        }
    }
    if !pending.is_empty() {
        tracing::debug!(transactions = pending.len(), "discarded uncommitted log records");
    }

    let current = numbers.last().copied().unwrap_or(first_file);
    let mut log = LogManager::open(Arc::clone(files), current, config.max_log_file_size)?;
    log.add_recovered_bytes(logged);

    tracing::info!(
        transactions = replayed,
        files = numbers.len(),
        sequence = state.last_sequence,
        "recovery complete"
    );
    Ok(Recovered {
        log,
        state,
        stores: stores
            .into_iter()
            .map(|(id, entries)| (id, entries.into_iter().collect()))
            .collect(),
    })
}

fn replay(stores: &mut HashMap<StoreId, HashMap<Vec<u8>, Vec<Vec<u8>>>>, records: Vec<LogRecord>) {
    for record in records {
        match record {
            LogRecord::Put {
                store_id,
                key,
                values,
                ..
            } => {
                stores.entry(store_id).or_default().insert(key, values);
            }
            LogRecord::Delete { store_id, key, .. } => {
                if let Some(entries) = stores.get_mut(&store_id) {
                    entries.remove(&key);
                }
            }
            LogRecord::Commit { .. } | LogRecord::Checkpoint { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Duplicates;
    use crate::error::ErrorKind;
    use crate::store::PutFlags;
    use tempfile::tempdir;

    #[test]
    fn reopen_restores_committed_data() {
        let dir = tempdir().unwrap();
        {
            let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
            let store = env.open_store("kv", StoreConfig::btree()).unwrap();
            store.put(None, b"a", b"1", PutFlags::Replace).unwrap();
            store.put(None, b"b", b"2", PutFlags::Replace).unwrap();
            store.delete(None, b"a").unwrap();

            let txn = env.begin(None).unwrap();
            store.put(Some(&txn), b"c", b"3", PutFlags::Replace).unwrap();
            // dropped without commit
        }
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let store = env.open_store("kv", StoreConfig::btree()).unwrap();
        assert_eq!(store.get(None, b"a").unwrap(), None);
        assert_eq!(store.get(None, b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(None, b"c").unwrap(), None);
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let _env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let err = Environment::open(dir.path(), EnvConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::EnvironmentLocked));
    }

    #[test]
    fn open_store_checks_catalog() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let first = env.open_store("s", StoreConfig::btree()).unwrap();
        let again = env.open_store("s", StoreConfig::btree()).unwrap();
        assert_eq!(first.id(), again.id());

        let err = env.open_store("s", StoreConfig::hash()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = env
            .open_store("s", StoreConfig::btree().duplicates(Duplicates::Sorted))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = env
            .open_store("missing", StoreConfig::btree().create(false))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn reopen_rejects_differing_comparators() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let sorted = StoreConfig::btree().duplicates(Duplicates::Sorted);
        env.open_store("d", sorted.clone().dup_compare(|a, b| b.cmp(a)))
            .unwrap();
        let err = env.open_store("d", sorted.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        env.open_store("d", sorted.dup_compare(|a, b| b.cmp(a))).unwrap();

        env.open_store("k", StoreConfig::btree()).unwrap();
        let err = env
            .open_store("k", StoreConfig::btree().key_compare(|a, b| b.cmp(a)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        env.open_store("q", StoreConfig::recno().fixed_length(4, b'.')).unwrap();
        let err = env
            .open_store("q", StoreConfig::recno().fixed_length(4, b'#'))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        {
            let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
            let store = env.open_store("kv", StoreConfig::btree()).unwrap();
            store.put(None, b"k", b"v", PutFlags::Replace).unwrap();
        }
        let log_path = dir.path().join(log_file_name(1));
        let mut data = std::fs::read(&log_path).unwrap();
        let good_len = data.len();
        data.extend_from_slice(b"BLOG\x01");
        std::fs::write(&log_path, &data).unwrap();

        {
            let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
            let store = env.open_store("kv", StoreConfig::btree()).unwrap();
            assert_eq!(store.get(None, b"k").unwrap(), Some(b"v".to_vec()));
        }
        assert_eq!(std::fs::read(&log_path).unwrap().len(), good_len);
    }

    #[test]
    fn checkpoint_then_archive() {
        let dir = tempdir().unwrap();
        {
            let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
            let store = env.open_store("kv", StoreConfig::btree()).unwrap();
            store.put(None, b"before", b"1", PutFlags::Replace).unwrap();

            assert!(env.log_archive(ArchiveMode::Relative).unwrap().is_empty());
            let info = env.checkpoint(&CheckpointOptions::default()).unwrap().unwrap();
            assert_eq!(info.start_file, 2);
            assert!(env.checkpoint(&CheckpointOptions::default()).unwrap().is_none());

            store.put(None, b"after", b"2", PutFlags::Replace).unwrap();
            assert_eq!(
                env.log_archive(ArchiveMode::Relative).unwrap(),
                vec![PathBuf::from(log_file_name(1))]
            );
            let absolute = env.log_archive(ArchiveMode::Absolute).unwrap();
            assert_eq!(absolute, vec![dir.path().join(log_file_name(1))]);
            env.remove_log_file(&absolute[0]).unwrap();

            let err = env.remove_log_file(&absolute[0]).unwrap_err();
            assert!(matches!(err, CoreError::InvalidOperation { .. } | CoreError::LogFileMissing { .. }));
            let err = env
                .remove_log_file(&dir.path().join(log_file_name(2)))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidOperation);
            assert_eq!(env.stats().log_files_removed, 1);
        }
        let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
        let store = env.open_store("kv", StoreConfig::btree()).unwrap();
        assert_eq!(store.get(None, b"before").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(None, b"after").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn missing_log_file_is_reported() {
        let dir = tempdir().unwrap();
        {
            let env = Environment::open(dir.path(), EnvConfig::default()).unwrap();
            let store = env.open_store("kv", StoreConfig::btree()).unwrap();
            store.put(None, b"k", b"v", PutFlags::Replace).unwrap();
        }
        std::fs::remove_file(dir.path().join(log_file_name(1))).unwrap();
        std::fs::write(dir.path().join(log_file_name(2)), b"").unwrap();
        let err = Environment::open(dir.path(), EnvConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::LogFileMissing { .. }));
    }
}
