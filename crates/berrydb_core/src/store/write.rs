//! Write paths shared by store handles and cursors.
//!
//! Every write locks the keys it touches, works out the new post-image of the
//! primary key and of every affected secondary key, and only then stages
//! them. A failed write therefore leaves the transaction's write set as it
//! was.

use crate::config::Duplicates;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockMode;
use crate::secondary::{index_entry, unindex_entry};
use crate::store::{view, PutFlags, StoreInner};
use crate::transaction::{Staged, Transaction};
use std::sync::Arc;

/// Cursor position: a key and the index of one of its duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Position {
    pub(crate) key: Vec<u8>,
    pub(crate) index: usize,
}

impl Position {
    pub(crate) fn new(key: Vec<u8>, index: usize) -> Self {
        Self { key, index }
    }
}

/// Secondary post-images to stage along with a primary write.
type SecondaryPlan = Vec<(Arc<StoreInner>, Vec<u8>, Staged)>;

/// Writes `value` under `key` and returns the position of the written item.
///
/// `at` is the cursor position that `Before`, `After` and `Current` refer to.
pub(crate) fn put_record(
    store: &StoreInner,
    txn: &Transaction<'_>,
    key: &[u8],
    value: &[u8],
    flags: PutFlags,
    at: Option<&Position>,
) -> CoreResult<Position> {
    if store.is_secondary() {
        return Err(CoreError::config(format!(
            "secondary store {} is written through its primary",
            store.name
        )));
    }
    store.check_key(key)?;
    let value = store.fit_value(value)?;
    txn.lock_key(store.id, key, LockMode::Exclusive)?;

    let current = view::resolve(store, Some(txn), key);
    if flags == PutFlags::NoOverwrite && current.is_some() {
        return Err(CoreError::key_exists(&store.name));
    }

    let at_index = || -> CoreResult<usize> {
        match at {
            Some(position) if position.key == key => Ok(position.index),
            _ => Err(CoreError::not_found(format!(
                "{flags:?} needs a cursor positioned on the key"
            ))),
        }
    };
    let old_value = current.as_ref().and_then(|values| values.first().cloned());
    let mut values = current.unwrap_or_default();

    let index = match store.config.duplicates {
        Duplicates::None => match flags {
            PutFlags::Before | PutFlags::After | PutFlags::NoDupData => {
                return Err(CoreError::invalid_operation(format!(
                    "{flags:?} requires duplicates on store {}",
                    store.name
                )));
            }
            PutFlags::Current => {
                at_index()?;
                if values.is_empty() {
                    return Err(CoreError::not_found("current item was deleted"));
                }
                values = vec![value.clone()];
                0
            }
            _ => {
                values = vec![value.clone()];
                0
            }
        },
        Duplicates::Unsorted => match flags {
            PutFlags::NoDupData => {
                return Err(CoreError::invalid_operation(format!(
                    "NoDupData requires sorted duplicates on store {}",
                    store.name
                )));
            }
            PutFlags::KeyFirst => {
                values.insert(0, value.clone());
                0
            }
            PutFlags::Before | PutFlags::After | PutFlags::Current => {
                let index = at_index()?;
                if index >= values.len() {
                    return Err(CoreError::not_found("current item was deleted"));
                }
                match flags {
                    PutFlags::Before => {
                        values.insert(index, value.clone());
                        index
                    }
                    PutFlags::After => {
                        values.insert(index + 1, value.clone());
                        index + 1
                    }
                    _ => {
                        values[index] = value.clone();
                        index
                    }
                }
            }
            _ => {
                values.push(value.clone());
                values.len() - 1
            }
        },
        Duplicates::Sorted => match flags {
            PutFlags::Before | PutFlags::After => {
                return Err(CoreError::invalid_operation(format!(
                    "{flags:?} is not allowed with sorted duplicates on store {}",
                    store.name
                )));
            }
            PutFlags::Current => {
                let index = at_index()?;
                let existing = values
                    .get(index)
                    .ok_or_else(|| CoreError::not_found("current item was deleted"))?;
                if store.dup_compare(existing, &value).is_ne() {
                    return Err(CoreError::invalid_operation(
                        "replacing a sorted duplicate must keep its sort position",
                    ));
                }
                values[index] = value.clone();
                index
            }
            _ => match values.binary_search_by(|probe| store.dup_compare(probe, &value)) {
                Ok(_) => return Err(CoreError::key_exists(&store.name)),
                Err(index) => {
                    values.insert(index, value.clone());
                    index
                }
            },
        },
    };

    let plan = plan_secondaries(store, txn, key, old_value.as_deref(), Some(&value))?;
    for (secondary, skey, staged) in plan {
        txn.stage(&secondary, skey, staged)?;
    }
    txn.stage(store, key.to_vec(), Some(values))?;
    txn.env().stats.record_write();
    Ok(Position::new(key.to_vec(), index))
}

/// Deletes `key` with all its duplicates. Returns false if it was absent.
///
/// On a secondary store the primary records indexed under `key` are deleted
/// instead.
pub(crate) fn delete_key(store: &StoreInner, txn: &Transaction<'_>, key: &[u8]) -> CoreResult<bool> {
    if store.is_secondary() {
        txn.lock_key(store.id, key, LockMode::Exclusive)?;
        let Some(primary_keys) = view::resolve(store, Some(txn), key) else {
            return Ok(false);
        };
        let primary = primary_of(store)?;
        for primary_key in primary_keys {
            delete_primary(&primary, txn, &primary_key)?;
        }
        return Ok(true);
    }
    delete_primary(store, txn, key)
}

/// Deletes the item at `position`.
pub(crate) fn delete_at(
    store: &StoreInner,
    txn: &Transaction<'_>,
    position: &Position,
) -> CoreResult<()> {
    txn.lock_key(store.id, &position.key, LockMode::Exclusive)?;
    let mut values = view::resolve(store, Some(txn), &position.key).unwrap_or_default();
    if position.index >= values.len() {
        return Err(CoreError::not_found("current item was deleted"));
    }

    if store.is_secondary() {
        let primary = primary_of(store)?;
        let primary_key = values.swap_remove(position.index);
        delete_primary(&primary, txn, &primary_key)?;
        return Ok(());
    }

    let removed = values.remove(position.index);
    let plan = plan_secondaries(store, txn, &position.key, Some(&removed), None)?;
    for (secondary, skey, staged) in plan {
        txn.stage(&secondary, skey, staged)?;
    }
    let staged = if values.is_empty() { None } else { Some(values) };
    txn.stage(store, position.key.clone(), staged)?;
    txn.env().stats.record_delete();
    Ok(())
}

fn delete_primary(store: &StoreInner, txn: &Transaction<'_>, key: &[u8]) -> CoreResult<bool> {
    txn.lock_key(store.id, key, LockMode::Exclusive)?;
    let Some(values) = view::resolve(store, Some(txn), key) else {
        return Ok(false);
    };

    let mut plan = SecondaryPlan::new();
    for value in &values {
        plan.extend(plan_secondaries(store, txn, key, Some(value), None)?);
    }
    for (secondary, skey, staged) in plan {
        txn.stage(&secondary, skey, staged)?;
    }
    txn.stage(store, key.to_vec(), None)?;
    txn.env().stats.record_delete();
    Ok(true)
}

fn primary_of(store: &StoreInner) -> CoreResult<Arc<StoreInner>> {
    store.primary().ok_or_else(|| {
        CoreError::invalid_operation(format!(
            "primary of secondary store {} is no longer open",
            store.name
        ))
    })
}

/// Works out how the secondaries of `store` change when the value of
/// `key` goes from `old` to `new`.
fn plan_secondaries(
    store: &StoreInner,
    txn: &Transaction<'_>,
    key: &[u8],
    old: Option<&[u8]>,
    new: Option<&[u8]>,
) -> CoreResult<SecondaryPlan> {
    let mut plan = SecondaryPlan::new();
    for association in store.associations() {
        let old_skey = old.and_then(|value| association.extract(key, value));
        let new_skey = new.and_then(|value| association.extract(key, value));
        if old_skey == new_skey {
            continue;
        }
        let secondary = &association.secondary;
        if let Some(skey) = old_skey {
            let staged = unindex_entry(secondary, txn, &skey, key)?;
            plan.push((Arc::clone(secondary), skey, staged));
        }
        if let Some(skey) = new_skey {
            if let Some(staged) = index_entry(secondary, txn, &skey, key)? {
                plan.push((Arc::clone(secondary), skey, staged));
            }
        }
    }
    Ok(plan)
}
