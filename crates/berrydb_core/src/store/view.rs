//! Reads through a transaction chain onto committed data.

use crate::store::data::Seek;
use crate::store::StoreInner;
use crate::transaction::Transaction;

/// Current values of `key` as seen by `txn` (committed data when `None`).
pub(crate) fn resolve(
    store: &StoreInner,
    txn: Option<&Transaction<'_>>,
    key: &[u8],
) -> Option<Vec<Vec<u8>>> {
    if let Some(txn) = txn {
        if let Some(staged) = txn.staged(store, key) {
            return staged.filter(|values| !values.is_empty());
        }
    }
    store
        .data
        .read()
        .get(&store.order, key)
        .filter(|values| !values.is_empty())
        .cloned()
}

/// First live key found by `seek` as seen by `txn`, with its values.
///
/// Keys deleted by the transaction chain are skipped.
pub(crate) fn seek(
    store: &StoreInner,
    txn: Option<&Transaction<'_>>,
    seek: Seek,
) -> Option<(Vec<u8>, Vec<Vec<u8>>)> {
    let mut seek = seek;
    loop {
        let mut best = store
            .data
            .read()
            .seek(&store.order, &seek)
            .map(|(key, _)| key.to_vec());

        if let Some(txn) = txn {
            for candidate in txn.staged_candidates(store, &seek) {
                best = Some(match best {
                    None => candidate,
                    Some(current) => {
                        let closer = if seek.is_forward() {
                            store.order.compare(&candidate, &current).is_lt()
                        } else {
                            store.order.compare(&candidate, &current).is_gt()
                        };
                        if closer {
                            candidate
                        } else {
                            current
                        }
                    }
                });
            }
        }

        let key = best?;
        match resolve(store, txn, &key) {
            Some(values) => return Some((key, values)),
            None => seek = seek.past(key),
        }
    }
}
