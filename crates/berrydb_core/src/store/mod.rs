//! Record stores.
//!
//! A store keeps its committed entries in memory, ordered by its
//! [`KeyOrder`](data::KeyOrder); each key maps to one value, or to a list of
//! duplicates. Transactions stage post-images of the keys they write and
//! apply them here on commit.

mod bulk;
mod cursor;
pub(crate) mod data;
pub(crate) mod view;
pub(crate) mod write;

pub use bulk::{BulkBatch, BulkDirection, BulkIter};
pub use cursor::{Cursor, CursorOp};

use crate::checkpoint::StoreImage;
use crate::config::{AccessMethod, StoreConfig};
use crate::env::EnvShared;
use crate::error::{first_error, CoreError, CoreResult};
use crate::join::{JoinCursor, JoinFlags};
use crate::lock::{LockMode, Resource};
use crate::secondary::Association;
use crate::transaction::{Staged, Transaction};
use crate::types::{key_recno, recno_key, RecordNumber, StoreId};
use data::{KeyOrder, Seek, SortedMap};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

/// Disposition of a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutFlags {
    /// Overwrite the value; on duplicate stores add a duplicate (at the end,
    /// or in sorted position).
    #[default]
    Replace,
    /// Fail with `KeyExists` if the key exists.
    NoOverwrite,
    /// Sorted duplicates: fail with `KeyExists` if the pair exists.
    NoDupData,
    /// Insert as the first duplicate of the key.
    KeyFirst,
    /// Insert as the last duplicate of the key.
    KeyLast,
    /// Unsorted duplicates: insert before the cursor position.
    Before,
    /// Unsorted duplicates: insert after the cursor position.
    After,
    /// Overwrite the value at the cursor position.
    Current,
}

impl PutFlags {
    /// Returns true if the disposition needs a positioned cursor.
    #[must_use]
    pub const fn needs_position(self) -> bool {
        matches!(self, Self::Before | Self::After | Self::Current)
    }
}

pub(crate) struct StoreInner {
    pub(crate) id: StoreId,
    pub(crate) name: String,
    pub(crate) config: StoreConfig,
    pub(crate) order: KeyOrder,
    pub(crate) data: RwLock<SortedMap<Vec<Vec<u8>>>>,
    pub(crate) secondaries: RwLock<Vec<Association>>,
    pub(crate) primary: RwLock<Option<Weak<StoreInner>>>,
}

impl StoreInner {
    pub(crate) fn new(id: StoreId, name: &str, config: StoreConfig, image: StoreImage) -> Self {
        let order = KeyOrder::for_config(&config);
        let data = SortedMap::from_entries(&order, image);
        Self {
            id,
            name: name.to_string(),
            config,
            order,
            data: RwLock::new(data),
            secondaries: RwLock::new(Vec::new()),
            primary: RwLock::new(None),
        }
    }

    /// Orders two duplicates of one key.
    pub(crate) fn dup_compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match &self.config.dup_compare {
            Some(compare) => compare(a, b),
            None => a.cmp(b),
        }
    }

    pub(crate) fn primary(&self) -> Option<Arc<StoreInner>> {
        self.primary.read().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn is_secondary(&self) -> bool {
        self.primary.read().is_some()
    }

    pub(crate) fn associations(&self) -> Vec<Association> {
        self.secondaries.read().clone()
    }

    /// Rejects keys a Recno store cannot hold.
    pub(crate) fn check_key(&self, key: &[u8]) -> CoreResult<()> {
        if self.config.access == AccessMethod::Recno && key_recno(key).map_or(true, |n| n == 0) {
            return Err(CoreError::invalid_operation(format!(
                "store {} is keyed by 4-byte record numbers starting at 1",
                self.name
            )));
        }
        Ok(())
    }

    /// Pads a value to the fixed record length, if one is configured.
    pub(crate) fn fit_value(&self, value: &[u8]) -> CoreResult<Vec<u8>> {
        match self.config.fixed_length {
            Some(len) if value.len() > len => Err(CoreError::invalid_operation(format!(
                "value of {} bytes exceeds fixed record length {len} of store {}",
                value.len(),
                self.name
            ))),
            Some(len) => {
                let mut padded = value.to_vec();
                padded.resize(len, self.config.pad_byte);
                Ok(padded)
            }
            None => Ok(value.to_vec()),
        }
    }

    /// Applies committed post-images.
    pub(crate) fn apply(&self, writes: &SortedMap<Staged>) {
        let mut data = self.data.write();
        for (key, staged) in writes.iter() {
            match staged {
                Some(values) if !values.is_empty() => {
                    data.insert(&self.order, key.to_vec(), values.clone());
                }
                _ => {
                    data.remove(&self.order, key);
                }
            }
        }
    }

    pub(crate) fn snapshot(&self) -> StoreImage {
        self.data
            .read()
            .iter()
            .map(|(key, values)| (key.to_vec(), values.clone()))
            .collect()
    }
}

/// Open stores plus recovered contents of stores not opened yet.
#[derive(Default)]
pub(crate) struct StoreRegistry {
    open: RwLock<BTreeMap<StoreId, Arc<StoreInner>>>,
    pending: Mutex<HashMap<StoreId, StoreImage>>,
}

impl StoreRegistry {
    pub(crate) fn with_pending(pending: HashMap<StoreId, StoreImage>) -> Self {
        Self {
            open: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(pending),
        }
    }

    pub(crate) fn get(&self, id: StoreId) -> Option<Arc<StoreInner>> {
        self.open.read().get(&id).cloned()
    }

    pub(crate) fn insert(&self, inner: Arc<StoreInner>) {
        self.open.write().insert(inner.id, inner);
    }

    /// Takes the recovered contents of a store that is being opened.
    pub(crate) fn take_pending(&self, id: StoreId) -> StoreImage {
        self.pending.lock().remove(&id).unwrap_or_default()
    }

    /// Contents of every store, open or pending, by store ID.
    pub(crate) fn snapshot(&self) -> Vec<(StoreId, StoreImage)> {
        let mut stores: Vec<_> = self
            .open
            .read()
            .values()
            .map(|store| (store.id, store.snapshot()))
            .collect();
        stores.extend(
            self.pending
                .lock()
                .iter()
                .map(|(id, image)| (*id, image.clone())),
        );
        stores.sort_by_key(|(id, _)| *id);
        stores
    }
}

/// Handle to an open record store.
///
/// Handles are cheap to clone and can be shared between threads.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
    pub(crate) env: Arc<EnvShared>,
}

impl Store {
    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the stable store ID.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// Returns the configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Returns true if this store is the secondary of an association.
    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.inner.is_secondary()
    }

    /// Returns the primary store of a secondary.
    #[must_use]
    pub fn primary(&self) -> Option<Store> {
        self.inner.primary().map(|inner| Store {
            inner,
            env: Arc::clone(&self.env),
        })
    }

    /// Runs `op` in `txn`, or in an auto-commit transaction when `txn` is
    /// `None`.
    pub(crate) fn auto_commit<T>(
        &self,
        txn: Option<&Transaction<'_>>,
        op: impl FnOnce(&Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        if let Some(txn) = txn {
            self.check_env(txn)?;
            return op(txn);
        }
        let txn = Transaction::begin(&self.env, None)?;
        match op(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => first_error(Err(err), txn.abort()),
        }
    }

    pub(crate) fn check_env(&self, txn: &Transaction<'_>) -> CoreResult<()> {
        if !Arc::ptr_eq(txn.env(), &self.env) {
            return Err(CoreError::invalid_operation(
                "transaction belongs to another environment",
            ));
        }
        Ok(())
    }

    /// Reads the values of `key`, taking a shared lock under a transaction.
    pub(crate) fn read_values(
        &self,
        txn: Option<&Transaction<'_>>,
        key: &[u8],
    ) -> CoreResult<Option<Vec<Vec<u8>>>> {
        if let Some(txn) = txn {
            self.check_env(txn)?;
            txn.lock_key(self.inner.id, key, LockMode::Shared)?;
        }
        self.env.stats.record_read();
        Ok(view::resolve(&self.inner, txn, key))
    }

    /// Returns the value of `key` (its first duplicate).
    ///
    /// Without a transaction this reads committed data without locking.
    pub fn get(&self, txn: Option<&Transaction<'_>>, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Ok(self
            .read_values(txn, key)?
            .and_then(|values| values.into_iter().next()))
    }

    /// Returns every duplicate of `key`, in duplicate order.
    pub fn get_all(&self, txn: Option<&Transaction<'_>>, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        Ok(self.read_values(txn, key)?.unwrap_or_default())
    }

    /// Writes `value` under `key`.
    ///
    /// Cursor-relative dispositions (`Before`, `After`, `Current`) need a
    /// cursor and fail with `InvalidOperation` here.
    pub fn put(
        &self,
        txn: Option<&Transaction<'_>>,
        key: &[u8],
        value: &[u8],
        flags: PutFlags,
    ) -> CoreResult<()> {
        if flags.needs_position() {
            return Err(CoreError::invalid_operation(format!(
                "{flags:?} requires a positioned cursor"
            )));
        }
        self.auto_commit(txn, |txn| {
            write::put_record(&self.inner, txn, key, value, flags, None).map(|_| ())
        })
    }

    /// Deletes `key` and all of its duplicates.
    ///
    /// On a secondary store this deletes every primary record indexed under
    /// `key`, and with them all their secondary entries. Returns false if the
    /// key did not exist.
    pub fn delete(&self, txn: Option<&Transaction<'_>>, key: &[u8]) -> CoreResult<bool> {
        self.auto_commit(txn, |txn| write::delete_key(&self.inner, txn, key))
    }

    /// Appends `value` under the next record number of a Recno store.
    pub fn append(&self, txn: Option<&Transaction<'_>>, value: &[u8]) -> CoreResult<RecordNumber> {
        if self.inner.config.access != AccessMethod::Recno {
            return Err(CoreError::invalid_operation(format!(
                "append requires a recno store, {} is {:?}",
                self.inner.name, self.inner.config.access
            )));
        }
        self.auto_commit(txn, |txn| {
            txn.lock(&Resource::Append(self.inner.id), LockMode::Exclusive)?;
            let last = view::seek(&self.inner, Some(txn), Seek::Last)
                .and_then(|(key, _)| key_recno(&key))
                .unwrap_or(0);
            let recno = last
                .checked_add(1)
                .ok_or_else(|| CoreError::invalid_operation("record numbers exhausted"))?;
            write::put_record(&self.inner, txn, &recno_key(recno), value, PutFlags::NoOverwrite, None)?;
            Ok(recno)
        })
    }

    /// Counts key/value pairs, duplicates included.
    pub fn len(&self, txn: Option<&Transaction<'_>>) -> CoreResult<usize> {
        if txn.is_none() {
            let data = self.inner.data.read();
            return Ok(data.iter().map(|(_, values)| values.len()).sum());
        }
        let mut cursor = self.cursor(txn)?;
        let mut count = 0;
        let mut next = cursor.get(CursorOp::First)?;
        while next.is_some() {
            count += 1;
            next = cursor.get(CursorOp::Next)?;
        }
        Ok(count)
    }

    /// Removes every record, returning how many key/value pairs went away.
    ///
    /// Secondary entries follow their primaries; truncating a secondary
    /// directly is rejected.
    pub fn truncate(&self, txn: Option<&Transaction<'_>>) -> CoreResult<usize> {
        if self.inner.is_secondary() {
            return Err(CoreError::config(format!(
                "truncate the primary of secondary store {} instead",
                self.inner.name
            )));
        }
        self.auto_commit(txn, |txn| {
            let mut removed = 0;
            while let Some((key, values)) = view::seek(&self.inner, Some(txn), Seek::First) {
                if !write::delete_key(&self.inner, txn, &key)? {
                    break;
                }
                removed += values.len();
            }
            tracing::debug!(store = %self.inner.name, removed, "store truncated");
            Ok(removed)
        })
    }

    /// Looks up `secondary_key` in a secondary store and returns the primary
    /// key and value of its first entry.
    pub fn get_with_primary(
        &self,
        txn: Option<&Transaction<'_>>,
        secondary_key: &[u8],
    ) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        let primary = self.require_primary()?;
        let Some(primary_key) = self.get(txn, secondary_key)? else {
            return Ok(None);
        };
        let value = primary.get(txn, &primary_key)?.ok_or_else(|| {
            CoreError::not_found(format!(
                "primary record missing for entry of secondary store {}",
                self.inner.name
            ))
        })?;
        Ok(Some((primary_key, value)))
    }

    pub(crate) fn require_primary(&self) -> CoreResult<Store> {
        self.primary().ok_or_else(|| {
            CoreError::invalid_operation(format!("store {} is not a secondary", self.inner.name))
        })
    }

    /// Opens a cursor, optionally bound to a transaction.
    pub fn cursor<'t>(&self, txn: Option<&'t Transaction<'t>>) -> CoreResult<Cursor<'t>> {
        if let Some(txn) = txn {
            self.check_env(txn)?;
            txn.ensure_active()?;
        }
        Ok(Cursor::new(self.clone(), txn))
    }

    /// Joins positioned cursors over secondaries of this store.
    ///
    /// Each cursor joins on the key it currently sits on. A `Set` that finds
    /// nothing leaves a cursor on its previous key, so check every `Set`
    /// result and skip the join when one of them is `None`.
    ///
    /// See [`JoinCursor`].
    pub fn join<'t>(&self, cursors: Vec<Cursor<'t>>, flags: JoinFlags) -> CoreResult<JoinCursor<'t>> {
        JoinCursor::new(self.clone(), cursors, flags)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
