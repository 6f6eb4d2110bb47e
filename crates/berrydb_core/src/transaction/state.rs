//! Transaction state.

use crate::env::EnvShared;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockMode, LockOwner, Resource};
use crate::store::data::{Seek, SortedMap};
use crate::store::StoreInner;
use crate::types::{StoreId, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// Post-image of one key: `None` means deleted.
pub(crate) type Staged = Option<Vec<Vec<u8>>>;

/// Buffered writes of one transaction, per store, in store key order.
pub(crate) type WriteSet = HashMap<StoreId, SortedMap<Staged>>;

struct TxnInner {
    state: TransactionState,
    writes: WriteSet,
}

/// A transaction.
///
/// Writes are buffered in the transaction and visible to it (and to its
/// children) at once; other transactions see them only after the top-level
/// commit. Locks are held until the top-level transaction ends.
///
/// A child transaction borrows its parent, so the parent cannot be committed
/// or aborted while the child exists. Cursors borrow their transaction the
/// same way. Dropping an active transaction aborts it.
pub struct Transaction<'p> {
    env: Arc<EnvShared>,
    parent: Option<&'p Transaction<'p>>,
    id: TransactionId,
    family: TransactionId,
    inner: Mutex<TxnInner>,
}

impl<'p> Transaction<'p> {
    pub(crate) fn begin(env: &Arc<EnvShared>, parent: Option<&'p Transaction<'p>>) -> CoreResult<Self> {
        if let Some(parent) = parent {
            parent.ensure_active()?;
            if !Arc::ptr_eq(&parent.env, env) {
                return Err(CoreError::invalid_operation(
                    "parent transaction belongs to another environment",
                ));
            }
        }
        let id = env.txns.allocate_id();
        let family = parent.map_or(id, |p| p.family);
        env.stats.record_transaction_start();
        tracing::debug!(txn = %id, parent = ?parent.map(|p| p.id), "transaction started");
        Ok(Self {
            env: Arc::clone(env),
            parent,
            id,
            family,
            inner: Mutex::new(TxnInner {
                state: TransactionState::Active,
                writes: HashMap::new(),
            }),
        })
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the ID of the parent transaction, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<TransactionId> {
        self.parent.map(|p| p.id)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns the number of keys this transaction has written.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes.values().map(SortedMap::len).sum()
    }

    /// Commits the transaction.
    ///
    /// A child merges its writes and locks into its parent. A top-level
    /// transaction logs its writes, applies them to the stores and releases
    /// its locks; once this returns `Ok` the writes are durable (subject to
    /// `sync_on_commit`).
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the transaction is not active; fatal errors if
    /// the log cannot be written, in which case the transaction is aborted.
    pub fn commit(self) -> CoreResult<()> {
        let writes = {
            let mut inner = self.inner.lock();
            if inner.state != TransactionState::Active {
                return Err(not_active(self.id, inner.state));
            }
            std::mem::take(&mut inner.writes)
        };

        let result = match self.parent {
            Some(parent) => {
                parent.merge_child(writes);
                self.env.locks.transfer(self.id, parent.owner());
                Ok(())
            }
            None => {
                let result = self.env.txns.commit(&self.env, self.id, &writes);
                self.env.locks.release_all(self.id);
                result
            }
        };

        let state = if result.is_ok() {
            self.env.stats.record_transaction_commit();
            tracing::debug!(txn = %self.id, "transaction committed");
            TransactionState::Committed
        } else {
            self.env.stats.record_transaction_abort();
            TransactionState::Aborted
        };
        self.inner.lock().state = state;
        result
    }

    /// Aborts the transaction, discarding its writes and releasing the locks
    /// it acquired itself.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the transaction already ended.
    pub fn abort(self) -> CoreResult<()> {
        self.abort_in_place()
    }

    fn abort_in_place(&self) -> CoreResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state != TransactionState::Active {
                return Err(not_active(self.id, inner.state));
            }
            inner.state = TransactionState::Aborted;
            inner.writes.clear();
        }
        self.env.locks.release_all(self.id);
        self.env.stats.record_transaction_abort();
        tracing::debug!(txn = %self.id, "transaction aborted");
        Ok(())
    }

    pub(crate) fn env(&self) -> &Arc<EnvShared> {
        &self.env
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        let state = self.inner.lock().state;
        if state != TransactionState::Active {
            return Err(not_active(self.id, state));
        }
        Ok(())
    }

    pub(crate) fn owner(&self) -> LockOwner {
        LockOwner {
            txn: self.id,
            family: self.family,
        }
    }

    /// Acquires a lock for this transaction.
    pub(crate) fn lock(&self, resource: &Resource, mode: LockMode) -> CoreResult<()> {
        self.ensure_active()?;
        self.env
            .locks
            .acquire(self.owner(), resource, mode, &self.env.stats)
    }

    /// Locks one key of `store`.
    pub(crate) fn lock_key(&self, store: StoreId, key: &[u8], mode: LockMode) -> CoreResult<()> {
        self.lock(&Resource::Key(store, key.to_vec()), mode)
    }

    /// Buffers the post-image of a key.
    pub(crate) fn stage(&self, store: &StoreInner, key: Vec<u8>, values: Staged) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(not_active(self.id, inner.state));
        }
        inner
            .writes
            .entry(store.id)
            .or_default()
            .insert(&store.order, key, values);
        Ok(())
    }

    /// Looks `key` up in this transaction and its ancestors, nearest first.
    ///
    /// The outer `None` means no transaction in the chain wrote the key.
    pub(crate) fn staged(&self, store: &StoreInner, key: &[u8]) -> Option<Staged> {
        let mut txn = Some(self);
        while let Some(current) = txn {
            let inner = current.inner.lock();
            if let Some(staged) = inner
                .writes
                .get(&store.id)
                .and_then(|map| map.get(&store.order, key))
            {
                return Some(staged.clone());
            }
            drop(inner);
            txn = current.parent;
        }
        None
    }

    /// Candidate keys for `seek`, one per transaction in the chain that wrote
    /// to `store`.
    pub(crate) fn staged_candidates(&self, store: &StoreInner, seek: &Seek) -> Vec<Vec<u8>> {
        let mut candidates = Vec::new();
        let mut txn = Some(self);
        while let Some(current) = txn {
            let inner = current.inner.lock();
            if let Some((key, _)) = inner
                .writes
                .get(&store.id)
                .and_then(|map| map.seek(&store.order, seek))
            {
                candidates.push(key.to_vec());
            }
            drop(inner);
            txn = current.parent;
        }
        candidates
    }

    fn merge_child(&self, writes: WriteSet) {
        let mut inner = self.inner.lock();
        for (store_id, map) in writes {
            let Some(store) = self.env.stores.get(store_id) else {
                continue;
            };
            let target = inner.writes.entry(store_id).or_default();
            for (key, staged) in map.into_entries() {
                target.insert(&store.order, key, staged);
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.inner.lock().state == TransactionState::Active {
            if let Err(err) = self.abort_in_place() {
                tracing::warn!(txn = %self.id, error = %err, "abort on drop failed");
            }
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("parent", &self.parent_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn not_active(id: TransactionId, state: TransactionState) -> CoreError {
    CoreError::invalid_operation(format!("{id} is not active ({state:?})"))
}
