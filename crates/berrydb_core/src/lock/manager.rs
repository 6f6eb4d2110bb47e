//! Key-granular lock table with waits-for deadlock detection.

use crate::error::{ConflictReason, CoreError, CoreResult};
use crate::stats::EnvStats;
use crate::types::{StoreId, TransactionId};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

/// Lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    /// Read lock; compatible with other shared locks.
    Shared,
    /// Write lock; incompatible with every lock of another family.
    Exclusive,
}

/// A lockable thing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// One key of one store.
    Key(StoreId, Vec<u8>),
    /// The right to assign the next record number of a store.
    Append(StoreId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(store, key) => {
                write!(f, "{store} key ")?;
                for byte in key.iter().take(16) {
                    write!(f, "{byte:02x}")?;
                }
                if key.len() > 16 {
                    f.write_str("..")?;
                }
                Ok(())
            }
            Self::Append(store) => write!(f, "{store} append"),
        }
    }
}

/// Identity of a lock requester.
///
/// `family` is the ID of the top-level transaction; locks of one family never
/// conflict with each other, so a child can touch what its parent holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOwner {
    /// Requesting transaction.
    pub txn: TransactionId,
    /// Top-level ancestor of the requesting transaction.
    pub family: TransactionId,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    family: TransactionId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockTable {
    holders: HashMap<Resource, HashMap<TransactionId, Holder>>,
    owned: HashMap<TransactionId, HashSet<Resource>>,
    /// Edges of the waits-for graph, between families.
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl LockTable {
    fn holds(&self, owner: LockOwner, resource: &Resource, mode: LockMode) -> bool {
        self.holders
            .get(resource)
            .and_then(|h| h.get(&owner.txn))
            .is_some_and(|holder| holder.mode >= mode)
    }

    fn blockers(&self, owner: LockOwner, resource: &Resource, mode: LockMode) -> HashSet<TransactionId> {
        let Some(holders) = self.holders.get(resource) else {
            return HashSet::new();
        };
        holders
            .values()
            .filter(|h| h.family != owner.family)
            .filter(|h| mode == LockMode::Exclusive || h.mode == LockMode::Exclusive)
            .map(|h| h.family)
            .collect()
    }

    fn grant(&mut self, owner: LockOwner, resource: Resource, mode: LockMode) {
        let holder = self
            .holders
            .entry(resource.clone())
            .or_default()
            .entry(owner.txn)
            .or_insert(Holder {
                family: owner.family,
                mode,
            });
        holder.mode = holder.mode.max(mode);
        self.owned.entry(owner.txn).or_default().insert(resource);
    }

    fn closes_cycle(&self, start: TransactionId) -> bool {
        let mut stack: Vec<TransactionId> = self
            .waits_for
            .get(&start)
            .map(|next| next.iter().copied().collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        while let Some(family) = stack.pop() {
            if family == start {
                return true;
            }
            if !seen.insert(family) {
                continue;
            }
            if let Some(next) = self.waits_for.get(&family) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    fn release(&mut self, txn: TransactionId, resource: &Resource) {
        if let Some(holders) = self.holders.get_mut(resource) {
            holders.remove(&txn);
            if holders.is_empty() {
                self.holders.remove(resource);
            }
        }
    }
}

/// Shared/exclusive locks on [`Resource`]s, held until the owning
/// transaction ends.
///
/// A request that cannot be granted waits. If waiting would close a cycle of
/// families waiting on each other, the request fails at once with a
/// [`ConflictReason::Deadlock`] conflict: the requester is the victim. With a
/// lock timeout configured, a wait that outlasts it fails with
/// [`ConflictReason::Timeout`].
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    timeout: Option<Duration>,
}

impl LockManager {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Acquires `resource` in `mode` for `owner`, upgrading a shared lock the
    /// owner already holds.
    pub fn acquire(
        &self,
        owner: LockOwner,
        resource: &Resource,
        mode: LockMode,
        stats: &EnvStats,
    ) -> CoreResult<()> {
        let mut table = self.table.lock();
        if table.holds(owner, resource, mode) {
            return Ok(());
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut waited = false;
        loop {
            let blockers = table.blockers(owner, resource, mode);
            if blockers.is_empty() {
                table.waits_for.remove(&owner.family);
                table.grant(owner, resource.clone(), mode);
                return Ok(());
            }

            table.waits_for.insert(owner.family, blockers);
            if table.closes_cycle(owner.family) {
                table.waits_for.remove(&owner.family);
                stats.record_deadlock();
                tracing::warn!(txn = %owner.txn, %resource, "deadlock detected, refusing lock request");
                return Err(conflict(owner, resource, ConflictReason::Deadlock));
            }

            if !waited {
                waited = true;
                stats.record_lock_wait();
                tracing::debug!(txn = %owner.txn, %resource, ?mode, "waiting for lock");
            }

            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut table, deadline).timed_out()
                        && !table.blockers(owner, resource, mode).is_empty()
                    {
                        table.waits_for.remove(&owner.family);
                        stats.record_lock_timeout();
                        tracing::warn!(txn = %owner.txn, %resource, "lock request timed out");
                        return Err(conflict(owner, resource, ConflictReason::Timeout));
                    }
                }
                None => self.released.wait(&mut table),
            }
        }
    }

    /// Releases every lock held by `txn` and wakes waiters.
    pub fn release_all(&self, txn: TransactionId) {
        let mut table = self.table.lock();
        if let Some(resources) = table.owned.remove(&txn) {
            for resource in &resources {
                table.release(txn, resource);
            }
        }
        table.waits_for.remove(&txn);
        drop(table);
        self.released.notify_all();
    }

    /// Hands every lock of a committed child to its parent.
    pub fn transfer(&self, child: TransactionId, parent: LockOwner) {
        let mut table = self.table.lock();
        let Some(resources) = table.owned.remove(&child) else {
            return;
        };
        for resource in resources {
            let mode = table
                .holders
                .get(&resource)
                .and_then(|h| h.get(&child))
                .map_or(LockMode::Shared, |h| h.mode);
            table.release(child, &resource);
            table.grant(parent, resource, mode);
        }
    }

    /// Number of locks `txn` holds.
    #[must_use]
    pub fn held_count(&self, txn: TransactionId) -> usize {
        self.table.lock().owned.get(&txn).map_or(0, HashSet::len)
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn conflict(owner: LockOwner, resource: &Resource, reason: ConflictReason) -> CoreError {
    CoreError::LockConflict {
        txn: owner.txn,
        resource: resource.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    fn owner(txn: u64) -> LockOwner {
        LockOwner {
            txn: TransactionId::new(txn),
            family: TransactionId::new(txn),
        }
    }

    fn key(k: &str) -> Resource {
        Resource::Key(StoreId::new(1), k.as_bytes().to_vec())
    }

    #[test]
    fn shared_locks_are_compatible() {
        let locks = LockManager::new(None);
        let stats = EnvStats::new();
        locks.acquire(owner(1), &key("a"), LockMode::Shared, &stats).unwrap();
        locks.acquire(owner(2), &key("a"), LockMode::Shared, &stats).unwrap();
        assert_eq!(stats.lock_waits(), 0);
    }

    #[test]
    fn family_members_do_not_conflict() {
        let locks = LockManager::new(Some(Duration::from_millis(10)));
        let stats = EnvStats::new();
        locks.acquire(owner(1), &key("a"), LockMode::Exclusive, &stats).unwrap();
        let child = LockOwner {
            txn: TransactionId::new(2),
            family: TransactionId::new(1),
        };
        locks.acquire(child, &key("a"), LockMode::Exclusive, &stats).unwrap();

        locks.transfer(child.txn, owner(1));
        assert_eq!(locks.held_count(child.txn), 0);
        assert_eq!(locks.held_count(TransactionId::new(1)), 1);
    }

    #[test]
    fn timeout_surfaces_as_conflict() {
        let locks = LockManager::new(Some(Duration::from_millis(20)));
        let stats = EnvStats::new();
        locks.acquire(owner(1), &key("a"), LockMode::Exclusive, &stats).unwrap();
        let err = locks
            .acquire(owner(2), &key("a"), LockMode::Shared, &stats)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::LockConflict {
                reason: ConflictReason::Timeout,
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn waiter_is_granted_after_release() {
        let locks = Arc::new(LockManager::new(None));
        let stats = Arc::new(EnvStats::new());
        locks.acquire(owner(1), &key("a"), LockMode::Exclusive, &stats).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let locks = Arc::clone(&locks);
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                locks.acquire(owner(2), &key("a"), LockMode::Exclusive, &stats).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        locks.release_all(TransactionId::new(1));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn opposite_order_deadlock_picks_a_victim() {
        let locks = Arc::new(LockManager::new(None));
        let stats = Arc::new(EnvStats::new());
        locks.acquire(owner(1), &key("a"), LockMode::Exclusive, &stats).unwrap();
        locks.acquire(owner(2), &key("b"), LockMode::Exclusive, &stats).unwrap();

        let first = {
            let locks = Arc::clone(&locks);
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                let result = locks.acquire(owner(1), &key("b"), LockMode::Exclusive, &stats);
                if result.is_err() {
                    locks.release_all(TransactionId::new(1));
                }
                result
            })
        };
        // Let the first request start waiting.
        thread::sleep(Duration::from_millis(50));
        let second = locks.acquire(owner(2), &key("a"), LockMode::Exclusive, &stats);
        if second.is_err() {
            locks.release_all(TransactionId::new(2));
        }
        let first = first.join().unwrap();

        assert!(first.is_ok() != second.is_ok());
        assert_eq!(stats.deadlocks(), 1);
    }

    #[test]
    fn resource_display() {
        assert_eq!(key("ab").to_string(), "store:1 key 6162");
        assert_eq!(Resource::Append(StoreId::new(3)).to_string(), "store:3 append");
    }
}
