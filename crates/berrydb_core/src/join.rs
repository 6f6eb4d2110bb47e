//! Equality joins over secondary indexes.
//!
//! A join takes cursors positioned on keys of several secondaries of one
//! primary and yields the primary records indexed under all of those keys.
//! One cursor drives: its duplicates are the candidate primary keys, and
//! each candidate is checked against every other cursor with a single
//! `GetBoth` lookup.

use crate::error::{CoreError, CoreResult};
use crate::store::{Cursor, CursorOp, Store};
use crate::transaction::Transaction;
use std::fmt;
use std::sync::Arc;

/// Options for [`Store::join`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinFlags {
    /// Keep the cursors in the order given instead of letting the one with
    /// the fewest duplicates drive.
    pub no_sort: bool,
    /// Yield primary keys only, leaving values empty.
    pub item_only: bool,
}

impl JoinFlags {
    /// Creates default flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `no_sort`.
    #[must_use]
    pub const fn no_sort(mut self, value: bool) -> Self {
        self.no_sort = value;
        self
    }

    /// Sets `item_only`.
    #[must_use]
    pub const fn item_only(mut self, value: bool) -> Self {
        self.item_only = value;
        self
    }
}

/// Progress of a join cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// No candidate examined yet.
    Unpositioned,
    /// Looking for the next candidate all cursors agree on.
    Scanning,
    /// The last call returned a record.
    Yielding,
    /// The driving cursor ran out of duplicates.
    Exhausted,
}

/// Cursor over the intersection of secondary lookups.
pub struct JoinCursor<'t> {
    primary: Store,
    cursors: Vec<Cursor<'t>>,
    keys: Vec<Vec<u8>>,
    flags: JoinFlags,
    state: JoinState,
    txn: Option<&'t Transaction<'t>>,
}

impl<'t> JoinCursor<'t> {
    pub(crate) fn new(primary: Store, cursors: Vec<Cursor<'t>>, flags: JoinFlags) -> CoreResult<Self> {
        let Some(first) = cursors.first() else {
            return Err(CoreError::config("a join needs at least one cursor"));
        };
        let txn = first.transaction();
        let txn_id = txn.map(Transaction::id);

        let mut ranked = Vec::with_capacity(cursors.len());
        for cursor in cursors {
            let store = cursor.store();
            let belongs = store
                .primary()
                .is_some_and(|p| Arc::ptr_eq(&p.inner, &primary.inner));
            if !belongs {
                return Err(CoreError::config(format!(
                    "store {} is not a secondary of {}",
                    store.name(),
                    primary.name()
                )));
            }
            if cursor.transaction().map(Transaction::id) != txn_id {
                return Err(CoreError::config(
                    "join cursors must share one transaction",
                ));
            }
            let Some(key) = cursor.current_key().map(<[u8]>::to_vec) else {
                return Err(CoreError::config(format!(
                    "join cursor on {} is not positioned",
                    store.name()
                )));
            };
            let count = if flags.no_sort { 0 } else { cursor.count()? };
            ranked.push((count, cursor, key));
        }
        if !flags.no_sort {
            ranked.sort_by_key(|(count, _, _)| *count);
        }

        let (cursors, keys) = ranked
            .into_iter()
            .map(|(_, cursor, key)| (cursor, key))
            .unzip();
        let join = Self {
            primary,
            cursors,
            keys,
            flags,
            state: JoinState::Unpositioned,
            txn,
        };
        tracing::debug!(
            primary = %join.primary.name(),
            driver = %join.cursors[0].store().name(),
            cursors = join.cursors.len(),
            "join opened"
        );
        Ok(join)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> JoinState {
        self.state
    }

    /// Returns the flags the join was opened with.
    #[must_use]
    pub fn flags(&self) -> JoinFlags {
        self.flags
    }

    /// Returns the next primary key and value in the intersection.
    ///
    /// With `item_only` the value is empty. Once the driving cursor is
    /// exhausted every call returns `Ok(None)`.
    pub fn next(&mut self) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let op = match self.state {
                JoinState::Exhausted => return Ok(None),
                JoinState::Unpositioned => CursorOp::FirstDup,
                JoinState::Scanning | JoinState::Yielding => CursorOp::NextDup,
            };
            self.state = JoinState::Scanning;

            let Some((_, candidate)) = self.cursors[0].get(op)? else {
                self.state = JoinState::Exhausted;
                return Ok(None);
            };
            if !self.matches_rest(&candidate)? {
                continue;
            }

            let value = if self.flags.item_only {
                Vec::new()
            } else {
                match self.primary.get(self.txn, &candidate)? {
                    Some(value) => value,
                    None => continue,
                }
            };
            self.state = JoinState::Yielding;
            return Ok(Some((candidate, value)));
        }
    }

    fn matches_rest(&mut self, candidate: &[u8]) -> CoreResult<bool> {
        for (cursor, key) in self.cursors.iter_mut().zip(&self.keys).skip(1) {
            if cursor.get(CursorOp::GetBoth(key, candidate))?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Closes the join and hands back its cursors, driving cursor first.
    #[must_use]
    pub fn close(self) -> Vec<Cursor<'t>> {
        self.cursors
    }
}

impl fmt::Debug for JoinCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCursor")
            .field("primary", &self.primary.name())
            .field("cursors", &self.cursors.len())
            .field("flags", &self.flags)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Duplicates, EnvConfig, StoreConfig};
    use crate::error::ErrorKind;
    use crate::secondary::Extracted;
    use crate::store::PutFlags;
    use crate::Environment;

    struct Fixture {
        env: Environment,
        cars: Store,
        by_color: Store,
        by_make: Store,
    }

    // Values are "color/make".
    fn fixture() -> Fixture {
        let env = Environment::open_in_memory(EnvConfig::default()).unwrap();
        let cars = env.open_store("cars", StoreConfig::btree()).unwrap();
        let secondary = StoreConfig::btree().duplicates(Duplicates::Sorted);
        let by_color = env.open_store("by_color", secondary.clone()).unwrap();
        let by_make = env.open_store("by_make", secondary).unwrap();
        for (field, store) in [(0usize, &by_color), (1, &by_make)] {
            env.associate(
                &cars,
                store,
                Arc::new(move |_key: &[u8], value: &[u8]| {
                    match value.split(|b| *b == b'/').nth(field) {
                        Some(part) => Extracted::Key(part.to_vec()),
                        None => Extracted::Skip,
                    }
                }),
            )
            .unwrap();
        }
        for (key, value) in [
            ("1", "red/ford"),
            ("2", "blue/ford"),
            ("3", "red/fiat"),
            ("4", "red/ford"),
            ("5", "green/audi"),
        ] {
            cars.put(None, key.as_bytes(), value.as_bytes(), PutFlags::Replace)
                .unwrap();
        }
        Fixture {
            env,
            cars,
            by_color,
            by_make,
        }
    }

    fn positioned<'t>(store: &Store, key: &[u8]) -> Cursor<'t> {
        let mut cursor = store.cursor(None).unwrap();
        cursor.get(CursorOp::Set(key)).unwrap();
        cursor
    }

    #[test]
    fn yields_intersection_once() {
        let f = fixture();
        let cursors = vec![positioned(&f.by_color, b"red"), positioned(&f.by_make, b"ford")];
        let mut join = f.cars.join(cursors, JoinFlags::new()).unwrap();
        assert_eq!(join.state(), JoinState::Unpositioned);

        let mut found = Vec::new();
        while let Some((key, value)) = join.next().unwrap() {
            assert_eq!(value, b"red/ford");
            found.push(key);
        }
        assert_eq!(found, vec![b"1".to_vec(), b"4".to_vec()]);
        assert_eq!(join.state(), JoinState::Exhausted);
        assert_eq!(join.next().unwrap(), None);

        for cursor in join.close() {
            cursor.close().unwrap();
        }
    }

    #[test]
    fn item_only_skips_values() {
        let f = fixture();
        let cursors = vec![positioned(&f.by_make, b"fiat"), positioned(&f.by_color, b"red")];
        let mut join = f
            .cars
            .join(cursors, JoinFlags::new().item_only(true).no_sort(true))
            .unwrap();
        assert_eq!(join.next().unwrap(), Some((b"3".to_vec(), Vec::new())));
        assert_eq!(join.next().unwrap(), None);
    }

    #[test]
    fn empty_intersection() {
        let f = fixture();
        let cursors = vec![positioned(&f.by_color, b"green"), positioned(&f.by_make, b"ford")];
        let mut join = f.cars.join(cursors, JoinFlags::new()).unwrap();
        assert_eq!(join.next().unwrap(), None);
    }

    #[test]
    fn rejects_invalid_cursors() {
        let f = fixture();
        let err = f.cars.join(Vec::new(), JoinFlags::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let unpositioned = f.by_color.cursor(None).unwrap();
        let err = f.cars.join(vec![unpositioned], JoinFlags::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let mut primary_cursor = f.cars.cursor(None).unwrap();
        primary_cursor.get(CursorOp::First).unwrap();
        let err = f.cars.join(vec![primary_cursor], JoinFlags::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let txn = f.env.begin(None).unwrap();
        let mut in_txn = f.by_make.cursor(Some(&txn)).unwrap();
        in_txn.get(CursorOp::Set(b"ford")).unwrap();
        let cursors = vec![positioned(&f.by_color, b"red"), in_txn];
        let err = f.cars.join(cursors, JoinFlags::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
