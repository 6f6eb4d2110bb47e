//! Model-checked integration harness.
//!
//! Drives a primary store with one associated secondary and tracks the
//! expected contents of both in plain maps, so every step can be verified
//! against the model.

use crate::fixtures::{collect_pairs, TestEnv};
use crate::generators::attribute_extractor;
use berrydb_core::{CoreResult, Duplicates, Extracted, PutFlags, Store, StoreConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A primary store indexed by a secondary, with the expected contents.
pub struct IndexHarness {
    /// The environment.
    pub env: TestEnv,
    /// The primary store.
    pub primary: Store,
    /// The secondary store, keyed by the first byte of each value.
    pub secondary: Store,
    records: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl IndexHarness {
    /// Creates a harness over a fresh in-memory environment.
    pub fn new() -> Self {
        Self::with_env(TestEnv::memory())
    }

    /// Creates a harness over `env`.
    pub fn with_env(env: TestEnv) -> Self {
        let primary = env
            .open_store("records", StoreConfig::btree())
            .expect("Failed to open primary");
        let secondary = env
            .open_store("by_attr", StoreConfig::btree().duplicates(Duplicates::Sorted))
            .expect("Failed to open secondary");
        env.associate(&primary, &secondary, Arc::new(attribute_extractor))
            .expect("Failed to associate");
        Self {
            env,
            primary,
            secondary,
            records: BTreeMap::new(),
        }
    }

    /// Puts a record in its own transaction and tracks it.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.env
            .with_retry(|txn| self.primary.put(Some(txn), key, value, PutFlags::Replace))
            .expect("Failed to put record");
        self.records.insert(key.to_vec(), value.to_vec());
    }

    /// Deletes a record in its own transaction and updates tracking.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let existed = self
            .env
            .with_retry(|txn| self.primary.delete(Some(txn), key))
            .expect("Failed to delete record");
        assert_eq!(existed, self.records.remove(key).is_some(), "delete disagreed with model");
        existed
    }

    /// Deletes every record indexed under `skey` through the secondary.
    pub fn delete_by_secondary(&mut self, skey: &[u8]) -> bool {
        let existed = self
            .env
            .with_retry(|txn| self.secondary.delete(Some(txn), skey))
            .expect("Failed to delete through secondary");
        self.records
            .retain(|k, v| attribute_extractor(k, v) != Extracted::Key(skey.to_vec()));
        existed
    }

    /// Runs `body` in a transaction that is then aborted; the model is left
    /// untouched.
    pub fn aborted<F>(&self, body: F)
    where
        F: FnOnce(&Store, &berrydb_core::Transaction<'_>) -> CoreResult<()>,
    {
        let txn = self.env.begin(None).expect("Failed to begin");
        body(&self.primary, &txn).expect("Aborted body failed");
        txn.abort().expect("Failed to abort");
    }

    /// Secondary contents the model predicts, in store order.
    pub fn expected_index(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut index: BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>> = BTreeMap::new();
        for (k, v) in &self.records {
            if let Extracted::Key(skey) = attribute_extractor(k, v) {
                index.entry(skey).or_default().insert(k.clone());
            }
        }
        index
            .into_iter()
            .flat_map(|(skey, pkeys)| pkeys.into_iter().map(move |pkey| (skey.clone(), pkey)))
            .collect()
    }

    /// Verifies both stores against the model.
    pub fn verify_all(&self) {
        let records: Vec<_> = self.records.clone().into_iter().collect();
        assert_eq!(collect_pairs(&self.primary), records, "primary diverged from model");
        assert_eq!(
            collect_pairs(&self.secondary),
            self.expected_index(),
            "secondary diverged from primary"
        );
    }

    /// Returns the number of tracked records.
    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }
}

impl Default for IndexHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn puts_and_updates_follow_index() {
        let mut harness = IndexHarness::new();
        harness.put(b"a", &[1, 10]);
        harness.put(b"b", &[1, 20]);
        harness.put(b"c", &[2]);
        harness.verify_all();

        harness.put(b"a", &[2, 11]);
        harness.put(b"b", b"");
        harness.verify_all();
        assert_eq!(
            harness.expected_index(),
            vec![(vec![2], b"a".to_vec()), (vec![2], b"c".to_vec())]
        );
    }

    #[test]
    fn deletes_follow_index() {
        let mut harness = IndexHarness::new();
        harness.put(b"a", &[1]);
        harness.put(b"b", &[1]);
        harness.put(b"c", &[3]);

        assert!(harness.delete(b"b"));
        assert!(!harness.delete(b"b"));
        harness.verify_all();

        assert!(harness.delete_by_secondary(&[1]));
        harness.verify_all();
        assert_eq!(harness.tracked_count(), 1);
    }

    #[test]
    fn aborted_writes_leave_no_trace() {
        let mut harness = IndexHarness::new();
        harness.put(b"keep", &[1]);

        harness.aborted(|store, txn| {
            store.put(Some(txn), b"gone", &[1], PutFlags::Replace)?;
            store.put(Some(txn), b"keep", &[2], PutFlags::Replace)?;
            store.delete(Some(txn), b"keep").map(|_| ())
        });

        harness.verify_all();
        assert_eq!(harness.primary.get(None, b"gone").unwrap(), None);
    }

    #[test]
    fn child_abort_discards_only_child_writes() {
        let harness = IndexHarness::new();
        let parent = harness.env.begin(None).unwrap();
        harness
            .primary
            .put(Some(&parent), b"p", &[1], PutFlags::Replace)
            .unwrap();
        {
            let child = harness.env.begin(Some(&parent)).unwrap();
            harness
                .primary
                .put(Some(&child), b"c", &[1], PutFlags::Replace)
                .unwrap();
            assert_eq!(harness.secondary.get_all(Some(&child), &[1]).unwrap().len(), 2);
            child.abort().unwrap();
        }
        assert_eq!(
            harness.secondary.get_all(Some(&parent), &[1]).unwrap(),
            vec![b"p".to_vec()]
        );
        parent.commit().unwrap();
        assert_eq!(harness.primary.get(None, b"c").unwrap(), None);
        assert_eq!(harness.primary.get(None, b"p").unwrap(), Some(vec![1]));
    }

    #[test]
    fn harness_survives_reopen() {
        let mut harness = IndexHarness::with_env(TestEnv::directory());
        harness.put(b"x", &[4, 4]);
        harness.put(b"y", &[5]);
        let IndexHarness {
            env,
            primary,
            secondary,
            records,
        } = harness;
        drop((primary, secondary));

        let env = env.reopen();
        let reopened = IndexHarness::with_env(env);
        let recovered: Vec<_> = records.into_iter().collect();
        assert_eq!(collect_pairs(&reopened.primary), recovered);
        // Associating a non-empty secondary keeps its recovered entries.
        assert_eq!(reopened.secondary.get(None, &[5]).unwrap(), Some(b"y".to_vec()));
    }
}
