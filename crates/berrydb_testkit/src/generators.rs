//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random keys, values and operation
//! sequences over small domains, so that collisions and duplicates are
//! common.

use berrydb_core::Extracted;
use proptest::prelude::*;

/// A single mutation of a primary store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Put `value` under `key`, replacing any existing value.
    Put(Vec<u8>, Vec<u8>),
    /// Delete `key`.
    Delete(Vec<u8>),
}

/// Strategy for short keys drawn from a small alphabet.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'f', 1..4)
}

/// Strategy for arbitrary values (possibly empty).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for values whose first byte is an attribute from `0..attrs`.
///
/// An empty value has no attribute and is skipped by [`attribute_extractor`].
pub fn attributed_value_strategy(attrs: u8) -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        1 => Just(Vec::new()),
        8 => (0..attrs, prop::collection::vec(any::<u8>(), 0..16)).prop_map(|(attr, mut rest)| {
            rest.insert(0, attr);
            rest
        }),
    ]
}

/// Strategy for a sequence of store mutations.
pub fn store_ops_strategy(len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => (key_strategy(), attributed_value_strategy(4)).prop_map(|(k, v)| StoreOp::Put(k, v)),
            1 => key_strategy().prop_map(StoreOp::Delete),
        ],
        0..len,
    )
}

/// Strategy for a list of key/value pairs with many repeated keys.
pub fn pairs_strategy(len: usize) -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    prop::collection::vec((key_strategy(), value_strategy()), 0..len)
}

/// Strategy for records carrying two small attributes, for joins.
pub fn attribute_pairs_strategy(len: usize) -> impl Strategy<Value = Vec<(u8, u8)>> {
    prop::collection::vec((0u8..3, 0u8..3), 0..len)
}

/// Extracts the first byte of a value as its secondary key, skipping empty
/// values.
pub fn attribute_extractor(_key: &[u8], value: &[u8]) -> Extracted {
    match value.first() {
        Some(attr) => Extracted::Key(vec![*attr]),
        None => Extracted::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{collect_pairs, TestEnv};
    use berrydb_core::{
        AccessMethod, BulkDirection, CursorOp, Duplicates, JoinFlags, PutFlags, Store,
        StoreConfig,
    };
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    fn walk(store: &Store, step: CursorOp<'_>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut cursor = store.cursor(None).unwrap();
        let mut pairs = Vec::new();
        while let Some(pair) = cursor.get(step).unwrap() {
            pairs.push(pair);
        }
        pairs
    }

    fn indexed_pair(env: &TestEnv) -> (Store, Store) {
        let primary = env.open_store("primary", StoreConfig::btree()).unwrap();
        let secondary = env
            .open_store("by_attr", StoreConfig::btree().duplicates(Duplicates::Sorted))
            .unwrap();
        env.associate(&primary, &secondary, Arc::new(attribute_extractor))
            .unwrap();
        (primary, secondary)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn secondary_matches_primary(ops in store_ops_strategy(40)) {
            let env = TestEnv::memory();
            let (primary, secondary) = indexed_pair(&env);

            let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
            for op in &ops {
                match op {
                    StoreOp::Put(k, v) => {
                        primary.put(None, k, v, PutFlags::Replace).unwrap();
                        model.insert(k.clone(), v.clone());
                    }
                    StoreOp::Delete(k) => {
                        let existed = primary.delete(None, k).unwrap();
                        prop_assert_eq!(existed, model.remove(k).is_some());
                    }
                }
            }

            let mut expected: BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>> = BTreeMap::new();
            for (k, v) in &model {
                if let Extracted::Key(skey) = attribute_extractor(k, v) {
                    expected.entry(skey).or_default().insert(k.clone());
                }
            }
            let expected: Vec<(Vec<u8>, Vec<u8>)> = expected
                .into_iter()
                .flat_map(|(skey, pkeys)| pkeys.into_iter().map(move |pkey| (skey.clone(), pkey)))
                .collect();

            let model_pairs: Vec<_> = model.into_iter().collect();
            prop_assert_eq!(collect_pairs(&primary), model_pairs);
            prop_assert_eq!(collect_pairs(&secondary), expected);
        }

        #[test]
        fn bulk_reads_match_cursor_walk(
            pairs in pairs_strategy(60),
            slack in 0usize..256,
            config in prop_oneof![
                Just(StoreConfig::btree().duplicates(Duplicates::Unsorted)),
                Just(StoreConfig::hash().duplicates(Duplicates::Unsorted)),
                Just(StoreConfig::recno()),
            ],
            backward in any::<bool>(),
        ) {
            let env = TestEnv::memory();
            let store = env.open_store("bulk", config.clone()).unwrap();
            for (k, v) in &pairs {
                if config.access == AccessMethod::Recno {
                    store.append(None, v).unwrap();
                } else {
                    store.put(None, k, v, PutFlags::KeyLast).unwrap();
                }
            }
            let (step, direction) = if backward {
                (CursorOp::Prev, BulkDirection::Backward)
            } else {
                (CursorOp::Next, BulkDirection::Forward)
            };
            let walked = walk(&store, step);
            let largest = walked.iter().map(|(k, v)| 8 + k.len() + v.len()).max().unwrap_or(8);

            let mut cursor = store.cursor(None).unwrap();
            let mut bulk = Vec::new();
            while let Some(batch) = cursor.get_bulk(largest + slack, direction).unwrap() {
                prop_assert!(batch.used() <= batch.capacity());
                bulk.extend(batch.iter().map(|(k, v)| (k.to_vec(), v.to_vec())));
            }
            prop_assert_eq!(bulk, walked);
        }

        #[test]
        fn join_yields_intersection(
            records in attribute_pairs_strategy(30),
            color in 0u8..3,
            make in 0u8..3,
        ) {
            let env = TestEnv::memory();
            let cars = env.open_store("cars", StoreConfig::btree()).unwrap();
            let by_color = env
                .open_store("color", StoreConfig::btree().duplicates(Duplicates::Sorted))
                .unwrap();
            let by_make = env
                .open_store("make", StoreConfig::btree().duplicates(Duplicates::Sorted))
                .unwrap();
            env.associate(&cars, &by_color, Arc::new(|_: &[u8], v: &[u8]| Extracted::Key(vec![v[0]])))
                .unwrap();
            env.associate(&cars, &by_make, Arc::new(|_: &[u8], v: &[u8]| Extracted::Key(vec![v[1]])))
                .unwrap();

            let mut expected = BTreeSet::new();
            for (i, (c, m)) in records.iter().enumerate() {
                let key = format!("car{i:03}").into_bytes();
                cars.put(None, &key, &[*c, *m], PutFlags::Replace).unwrap();
                if *c == color && *m == make {
                    expected.insert(key);
                }
            }

            let txn = env.begin(None).unwrap();
            let mut found = BTreeSet::new();
            {
                let mut color_cursor = by_color.cursor(Some(&txn)).unwrap();
                let mut make_cursor = by_make.cursor(Some(&txn)).unwrap();
                let positioned = color_cursor.get(CursorOp::Set(&[color])).unwrap().is_some()
                    && make_cursor.get(CursorOp::Set(&[make])).unwrap().is_some();
                if positioned {
                    let mut join = cars
                        .join(vec![color_cursor, make_cursor], JoinFlags::new())
                        .unwrap();
                    while let Some((key, value)) = join.next().unwrap() {
                        prop_assert_eq!(value, vec![color, make]);
                        prop_assert!(found.insert(key), "join yielded a key twice");
                    }
                }
            }
            txn.commit().unwrap();
            prop_assert_eq!(found, expected);
        }
    }

    #[test]
    fn extractor_skips_empty_values() {
        assert_eq!(attribute_extractor(b"k", b""), Extracted::Skip);
        assert_eq!(attribute_extractor(b"k", &[2, 9]), Extracted::Key(vec![2]));
    }
}
