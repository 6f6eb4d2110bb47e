//! Secondary indexes.
//!
//! A secondary store maps keys derived from primary records back to primary
//! keys. Once a secondary is associated with its primary, every primary write
//! updates the secondary in the same transaction, and the secondary can no
//! longer be written directly.

use crate::config::Duplicates;
use crate::env::EnvShared;
use crate::error::{first_error, CoreError, CoreResult};
use crate::lock::LockMode;
use crate::store::{view, Store, StoreInner};
use crate::transaction::{Staged, Transaction};
use std::fmt;
use std::sync::Arc;

/// Result of a secondary key extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// Index the primary record under this secondary key.
    Key(Vec<u8>),
    /// Leave the primary record out of the secondary.
    Skip,
}

/// Derives a secondary key from a primary key and value.
///
/// Extractors must be pure: the same record must always produce the same
/// result, or stale secondary entries cannot be found again.
pub type Extractor = Arc<dyn Fn(&[u8], &[u8]) -> Extracted + Send + Sync>;

/// A secondary store registered on its primary.
#[derive(Clone)]
pub(crate) struct Association {
    pub(crate) secondary: Arc<StoreInner>,
    pub(crate) extractor: Extractor,
}

impl Association {
    /// Secondary key of one primary record, if it is indexed.
    pub(crate) fn extract(&self, key: &[u8], value: &[u8]) -> Option<Vec<u8>> {
        match (self.extractor)(key, value) {
            Extracted::Key(skey) => Some(skey),
            Extracted::Skip => None,
        }
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("secondary", &self.secondary.name)
            .finish_non_exhaustive()
    }
}

/// New post-image of `skey` once `pkey` is indexed under it.
///
/// Returns `None` if the pair is already there. A secondary without
/// duplicates that holds `skey` for another primary key rejects the insert.
pub(crate) fn index_entry(
    secondary: &StoreInner,
    txn: &Transaction<'_>,
    skey: &[u8],
    pkey: &[u8],
) -> CoreResult<Option<Staged>> {
    secondary.check_key(skey)?;
    txn.lock_key(secondary.id, skey, LockMode::Exclusive)?;
    let mut values = view::resolve(secondary, Some(txn), skey).unwrap_or_default();
    if values.iter().any(|existing| existing == pkey) {
        return Ok(None);
    }
    match secondary.config.duplicates {
        Duplicates::None if !values.is_empty() => {
            return Err(CoreError::key_exists(&secondary.name));
        }
        Duplicates::None | Duplicates::Unsorted => values.push(pkey.to_vec()),
        Duplicates::Sorted => {
            let index = values
                .binary_search_by(|probe| secondary.dup_compare(probe, pkey))
                .unwrap_or_else(|index| index);
            values.insert(index, pkey.to_vec());
        }
    }
    Ok(Some(Some(values)))
}

/// New post-image of `skey` once `pkey` is no longer indexed under it.
pub(crate) fn unindex_entry(
    secondary: &StoreInner,
    txn: &Transaction<'_>,
    skey: &[u8],
    pkey: &[u8],
) -> CoreResult<Staged> {
    txn.lock_key(secondary.id, skey, LockMode::Exclusive)?;
    let mut values = view::resolve(secondary, Some(txn), skey).unwrap_or_default();
    values.retain(|existing| existing != pkey);
    Ok(if values.is_empty() { None } else { Some(values) })
}

/// Registers `secondary` as an index of `primary`.
///
/// An empty secondary is filled from the committed contents of the primary
/// in a transaction of its own; if that fails the association is undone.
pub(crate) fn associate(
    env: &Arc<EnvShared>,
    primary: &Store,
    secondary: &Store,
    extractor: Extractor,
) -> CoreResult<()> {
    let (p, s) = (&primary.inner, &secondary.inner);
    if !Arc::ptr_eq(&primary.env, env) || !Arc::ptr_eq(&secondary.env, env) {
        return Err(CoreError::config("stores belong to another environment"));
    }
    if Arc::ptr_eq(p, s) {
        return Err(CoreError::config(format!(
            "store {} cannot be its own secondary",
            p.name
        )));
    }
    if p.config.duplicates.enabled() {
        return Err(CoreError::config(format!(
            "primary store {} must not have duplicates",
            p.name
        )));
    }
    if p.is_secondary() {
        return Err(CoreError::config(format!(
            "store {} is itself a secondary",
            p.name
        )));
    }
    {
        let mut link = s.primary.write();
        if link.is_some() || !s.secondaries.read().is_empty() {
            return Err(CoreError::config(format!(
                "store {} is already associated",
                s.name
            )));
        }
        *link = Some(Arc::downgrade(p));
    }
    p.secondaries.write().push(Association {
        secondary: Arc::clone(s),
        extractor,
    });

    if let Err(err) = populate(env, p, s) {
        p.secondaries
            .write()
            .retain(|association| !Arc::ptr_eq(&association.secondary, s));
        *s.primary.write() = None;
        return Err(err);
    }
    tracing::debug!(primary = %p.name, secondary = %s.name, "secondary associated");
    Ok(())
}

fn populate(env: &Arc<EnvShared>, primary: &StoreInner, secondary: &Arc<StoreInner>) -> CoreResult<()> {
    if !secondary.data.read().is_empty() {
        return Ok(());
    }
    let association = primary
        .secondaries
        .read()
        .iter()
        .find(|association| Arc::ptr_eq(&association.secondary, secondary))
        .cloned()
        .ok_or_else(|| CoreError::invalid_operation("association vanished while populating"))?;
    let records = primary.snapshot();
    if records.is_empty() {
        return Ok(());
    }

    let txn = Transaction::begin(env, None)?;
    let result: CoreResult<usize> = (|| {
        let mut indexed = 0usize;
        for (key, values) in &records {
            for value in values {
                let Some(skey) = association.extract(key, value) else {
                    continue;
                };
                if let Some(staged) = index_entry(secondary, &txn, &skey, key)? {
                    txn.stage(secondary, skey, staged)?;
                    indexed += 1;
                }
            }
        }
        Ok(indexed)
    })();
    match result {
        Ok(indexed) => {
            txn.commit()?;
            tracing::debug!(secondary = %secondary.name, indexed, "secondary populated");
            Ok(())
        }
        Err(err) => first_error(Err(err), txn.abort()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvConfig, StoreConfig};
    use crate::error::ErrorKind;
    use crate::store::PutFlags;
    use crate::Environment;

    fn first_byte() -> Extractor {
        Arc::new(|_key: &[u8], value: &[u8]| match value.first() {
            Some(byte) => Extracted::Key(vec![*byte]),
            None => Extracted::Skip,
        })
    }

    fn setup() -> (Environment, Store, Store) {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let primary = env.open_store("people", StoreConfig::btree()).unwrap();
        let secondary = env
            .open_store(
                "by_initial",
                StoreConfig::btree().duplicates(Duplicates::Sorted),
            )
            .unwrap();
        (env, primary, secondary)
    }

    #[test]
    fn writes_follow_into_secondary() {
        let (env, primary, secondary) = setup();
        env.associate(&primary, &secondary, first_byte()).unwrap();

        primary.put(None, b"1", b"ada", PutFlags::Replace).unwrap();
        primary.put(None, b"2", b"alan", PutFlags::Replace).unwrap();
        assert_eq!(
            secondary.get_all(None, b"a").unwrap(),
            vec![b"1".to_vec(), b"2".to_vec()]
        );

        primary.put(None, b"1", b"bea", PutFlags::Replace).unwrap();
        assert_eq!(secondary.get_all(None, b"a").unwrap(), vec![b"2".to_vec()]);
        assert_eq!(secondary.get_all(None, b"b").unwrap(), vec![b"1".to_vec()]);

        primary.delete(None, b"2").unwrap();
        assert_eq!(secondary.get(None, b"a").unwrap(), None);
    }

    #[test]
    fn skip_leaves_record_unindexed() {
        let (env, primary, secondary) = setup();
        env.associate(&primary, &secondary, first_byte()).unwrap();
        primary.put(None, b"1", b"", PutFlags::Replace).unwrap();
        assert_eq!(secondary.len(None).unwrap(), 0);
    }

    #[test]
    fn associate_populates_empty_secondary() {
        let (env, primary, secondary) = setup();
        primary.put(None, b"1", b"xy", PutFlags::Replace).unwrap();
        primary.put(None, b"2", b"xz", PutFlags::Replace).unwrap();
        env.associate(&primary, &secondary, first_byte()).unwrap();
        assert_eq!(secondary.get_all(None, b"x").unwrap().len(), 2);
    }

    #[test]
    fn associate_rejects_bad_pairs() {
        let (env, primary, secondary) = setup();
        let err = env.associate(&primary, &primary, first_byte()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = env.associate(&secondary, &primary, first_byte()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        env.associate(&primary, &secondary, first_byte()).unwrap();
        let other = env.open_store("other", StoreConfig::btree()).unwrap();
        let err = env.associate(&other, &secondary, first_byte()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn unique_secondary_rejects_collision() {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let primary = env.open_store("people", StoreConfig::btree()).unwrap();
        let unique = env.open_store("unique", StoreConfig::btree()).unwrap();
        env.associate(&primary, &unique, first_byte()).unwrap();

        primary.put(None, b"1", b"ada", PutFlags::Replace).unwrap();
        let err = primary.put(None, b"2", b"amy", PutFlags::Replace).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyExists);
        assert_eq!(primary.get(None, b"2").unwrap(), None);
        assert_eq!(unique.get(None, b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn secondary_rejects_direct_writes_and_deletes_primaries() {
        let (env, primary, secondary) = setup();
        env.associate(&primary, &secondary, first_byte()).unwrap();
        primary.put(None, b"1", b"ada", PutFlags::Replace).unwrap();
        primary.put(None, b"2", b"alan", PutFlags::Replace).unwrap();

        let err = secondary.put(None, b"a", b"3", PutFlags::Replace).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        assert!(secondary.delete(None, b"a").unwrap());
        assert_eq!(primary.len(None).unwrap(), 0);
    }

    #[test]
    fn get_with_primary_resolves_record() {
        let (env, primary, secondary) = setup();
        env.associate(&primary, &secondary, first_byte()).unwrap();
        primary.put(None, b"7", b"grace", PutFlags::Replace).unwrap();
        assert_eq!(
            secondary.get_with_primary(None, b"g").unwrap(),
            Some((b"7".to_vec(), b"grace".to_vec()))
        );
        assert_eq!(secondary.get_with_primary(None, b"z").unwrap(), None);
        let err = primary.get_with_primary(None, b"7").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }
}
