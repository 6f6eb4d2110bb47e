//! Cursors over record stores.

use crate::config::{AccessMethod, Duplicates};
use crate::error::{CoreError, CoreResult};
use crate::lock::LockMode;
use crate::store::bulk::{entry_size, BulkBatch, BulkDirection};
use crate::store::data::Seek;
use crate::store::write::{self, Position};
use crate::store::{view, PutFlags, Store};
use crate::transaction::Transaction;
use crate::types::{key_recno, recno_key, RecordNumber};
use std::fmt;

/// Cursor movement and lookup operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp<'a> {
    /// First item of the store.
    First,
    /// Last item of the store.
    Last,
    /// Next item, duplicates included (`First` when unpositioned).
    Next,
    /// Previous item, duplicates included (`Last` when unpositioned).
    Prev,
    /// Next duplicate of the current key.
    NextDup,
    /// Previous duplicate of the current key.
    PrevDup,
    /// First item of the next key (`First` when unpositioned).
    NextNoDup,
    /// Last item of the previous key (`Last` when unpositioned).
    PrevNoDup,
    /// First duplicate of the current key.
    FirstDup,
    /// Last duplicate of the current key.
    LastDup,
    /// The item under the cursor.
    Current,
    /// First item of exactly this key.
    Set(&'a [u8]),
    /// First item of the smallest key greater than or equal to this one.
    SetRange(&'a [u8]),
    /// Exactly this key/value pair.
    GetBoth(&'a [u8], &'a [u8]),
    /// This key with the smallest duplicate greater than or equal to the
    /// value (sorted duplicates; exact match otherwise).
    GetBothRange(&'a [u8], &'a [u8]),
    /// The n-th record (1-based) of a Recno store or of a B-tree store with
    /// record numbers.
    SetRecno(RecordNumber),
}

type Found = Option<(Position, Vec<u8>)>;

/// A position in a store.
///
/// A cursor borrows the transaction it runs in, so the transaction cannot end
/// while the cursor is open. Without a transaction, reads see committed data
/// and writes commit one by one.
///
/// A lookup that finds nothing returns `Ok(None)` and leaves the cursor where
/// it was.
pub struct Cursor<'t> {
    store: Store,
    txn: Option<&'t Transaction<'t>>,
    position: Option<Position>,
    deleted: bool,
    after_bulk: bool,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(store: Store, txn: Option<&'t Transaction<'t>>) -> Self {
        Self {
            store,
            txn,
            position: None,
            deleted: false,
            after_bulk: false,
        }
    }

    /// Returns the store the cursor walks.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns the transaction the cursor is bound to.
    #[must_use]
    pub fn transaction(&self) -> Option<&'t Transaction<'t>> {
        self.txn
    }

    /// Returns true if the cursor sits on an item.
    #[must_use]
    pub fn is_positioned(&self) -> bool {
        self.position.is_some()
    }

    /// Moves the cursor and returns the key and value it lands on.
    pub fn get(&mut self, op: CursorOp<'_>) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        let found = self.locate(op)?;
        self.store.env.stats.record_read();
        Ok(found.map(|(position, value)| {
            let key = position.key.clone();
            self.settle(position);
            (key, value)
        }))
    }

    /// Logical record number of the current item.
    pub fn recno(&self) -> CoreResult<RecordNumber> {
        let position = self.current_position()?;
        let config = self.store.config();
        if config.access == AccessMethod::Recno {
            return key_recno(&position.key)
                .ok_or_else(|| CoreError::invalid_format("malformed record number key"));
        }
        if !config.has_record_numbers() {
            return Err(self.no_record_numbers());
        }

        let mut before = 0usize;
        let mut seek = Seek::First;
        while let Some((key, values)) = self.seek(seek)? {
            if key == position.key {
                let recno = before + position.index + 1;
                return RecordNumber::try_from(recno)
                    .map_err(|_| CoreError::invalid_operation("record number out of range"));
            }
            before += values.len();
            seek = Seek::After(key);
        }
        Err(CoreError::not_found("current item was deleted"))
    }

    /// Writes through the cursor and moves it onto the written item.
    ///
    /// For `Before`, `After` and `Current` the key is taken from the cursor
    /// position and `key` is ignored.
    pub fn put(&mut self, key: &[u8], value: &[u8], flags: PutFlags) -> CoreResult<()> {
        let at = if flags.needs_position() {
            if self.deleted {
                return Err(CoreError::not_found("current item was deleted"));
            }
            Some(self.current_position()?.clone())
        } else {
            None
        };
        let key = at.as_ref().map_or(key, |position| position.key.as_slice());
        let inner = &self.store.inner;
        let position = self.store.auto_commit(self.txn, |txn| {
            write::put_record(inner, txn, key, value, flags, at.as_ref())
        })?;
        self.settle(position);
        Ok(())
    }

    /// Appends `values` as the last duplicates of `key`, all in one
    /// transaction, and leaves the cursor on the last of them.
    pub fn put_many<I>(&mut self, key: &[u8], values: I) -> CoreResult<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        if !self.store.config().duplicates.enabled() {
            return Err(CoreError::invalid_operation(format!(
                "put_many requires duplicates on store {}",
                self.store.name()
            )));
        }
        let inner = &self.store.inner;
        let last = self.store.auto_commit(self.txn, |txn| {
            let mut last = None;
            for value in values {
                last = Some(write::put_record(
                    inner,
                    txn,
                    key,
                    value.as_ref(),
                    PutFlags::KeyLast,
                    None,
                )?);
            }
            Ok(last)
        })?;
        if let Some(position) = last {
            self.settle(position);
        }
        Ok(())
    }

    /// Deletes the item under the cursor.
    ///
    /// On a secondary cursor the primary record is deleted, which removes
    /// all of its secondary entries. The cursor stays where the item was, so
    /// `Next` and `Prev` continue from there.
    pub fn del(&mut self) -> CoreResult<()> {
        if self.deleted {
            return Err(CoreError::not_found("current item was already deleted"));
        }
        let position = self.current_position()?.clone();
        let inner = &self.store.inner;
        self.store
            .auto_commit(self.txn, |txn| write::delete_at(inner, txn, &position))?;
        self.deleted = true;
        Ok(())
    }

    /// Number of duplicates of the current key.
    pub fn count(&self) -> CoreResult<usize> {
        let position = self.current_position()?;
        Ok(self.read_key(&position.key)?.map_or(0, |values| values.len()))
    }

    /// Moves a secondary cursor and returns the secondary key with the
    /// primary key and value it refers to.
    pub fn get_with_primary(
        &mut self,
        op: CursorOp<'_>,
    ) -> CoreResult<Option<(Vec<u8>, Vec<u8>, Vec<u8>)>> {
        let primary = self.store.require_primary()?;
        let Some((skey, pkey)) = self.get(op)? else {
            return Ok(None);
        };
        let value = primary.get(self.txn, &pkey)?.ok_or_else(|| {
            CoreError::not_found(format!(
                "primary record missing for entry of secondary store {}",
                self.store.name()
            ))
        })?;
        Ok(Some((skey, pkey, value)))
    }

    /// Collects the following records into a batch of at most `capacity`
    /// bytes and leaves the cursor on the last record collected.
    ///
    /// An unpositioned cursor starts from the first record (the last one
    /// going backward). `Duplicates` collects the rest of the current key,
    /// starting with the current item unless the previous call was also a
    /// bulk read. Returns `Ok(None)` when there is nothing left.
    ///
    /// # Errors
    ///
    /// `BufferTooSmall` if the first record alone does not fit.
    pub fn get_bulk(
        &mut self,
        capacity: usize,
        direction: BulkDirection,
    ) -> CoreResult<Option<BulkBatch>> {
        let (mut op, step) = match direction {
            BulkDirection::Forward => (CursorOp::Next, CursorOp::Next),
            BulkDirection::Backward => (CursorOp::Prev, CursorOp::Prev),
            BulkDirection::Duplicates => {
                self.current_position()?;
                let first = if self.after_bulk || self.deleted {
                    CursorOp::NextDup
                } else {
                    CursorOp::Current
                };
                (first, CursorOp::NextDup)
            }
        };

        let mut batch = BulkBatch::with_capacity(capacity);
        while let Some((position, value)) = self.locate(op)? {
            if !batch.try_push(&position.key, &value) {
                if batch.is_empty() {
                    return Err(CoreError::BufferTooSmall {
                        needed: entry_size(position.key.len(), value.len()),
                        capacity,
                    });
                }
                break;
            }
            self.settle(position);
            op = step;
        }

        if batch.is_empty() {
            return Ok(None);
        }
        self.after_bulk = true;
        self.store.env.stats.record_bulk_batch();
        tracing::trace!(store = %self.store.name(), records = batch.len(), "bulk batch filled");
        Ok(Some(batch))
    }

    /// Closes the cursor.
    ///
    /// Cursors hold no locks of their own: transactional reads lock on
    /// behalf of the transaction and keep those locks until it ends, and
    /// reads without a transaction take none. Dropping a cursor is
    /// equivalent to closing it, except that `close` reports a transaction
    /// that has already ended.
    pub fn close(self) -> CoreResult<()> {
        if let Some(txn) = self.txn {
            txn.ensure_active()?;
        }
        Ok(())
    }

    pub(crate) fn current_key(&self) -> Option<&[u8]> {
        self.position.as_ref().map(|position| position.key.as_slice())
    }

    fn settle(&mut self, position: Position) {
        self.position = Some(position);
        self.deleted = false;
        self.after_bulk = false;
    }

    fn current_position(&self) -> CoreResult<&Position> {
        self.position
            .as_ref()
            .ok_or_else(|| CoreError::not_found("cursor is not positioned"))
    }

    fn no_record_numbers(&self) -> CoreError {
        CoreError::invalid_operation(format!(
            "store {} has no record numbers",
            self.store.name()
        ))
    }

    /// Values of `key`, under a shared lock when in a transaction.
    fn read_key(&self, key: &[u8]) -> CoreResult<Option<Vec<Vec<u8>>>> {
        let inner = &self.store.inner;
        if let Some(txn) = self.txn {
            txn.lock_key(inner.id, key, LockMode::Shared)?;
        }
        Ok(view::resolve(inner, self.txn, key))
    }

    /// Seeks to a live key, locking it when in a transaction.
    ///
    /// The key is read again once locked; if it went away while the lock was
    /// awaited the seek moves on past it.
    fn seek(&self, mut seek: Seek) -> CoreResult<Option<(Vec<u8>, Vec<Vec<u8>>)>> {
        let inner = &self.store.inner;
        loop {
            let Some((key, values)) = view::seek(inner, self.txn, seek.clone()) else {
                return Ok(None);
            };
            if self.txn.is_none() {
                return Ok(Some((key, values)));
            }
            match self.read_key(&key)? {
                Some(values) => return Ok(Some((key, values))),
                None => seek = seek.past(key),
            }
        }
    }

    fn first_of(found: Option<(Vec<u8>, Vec<Vec<u8>>)>) -> Found {
        found.and_then(|(key, mut values)| {
            (!values.is_empty()).then(|| (Position::new(key, 0), values.swap_remove(0)))
        })
    }

    fn last_of(found: Option<(Vec<u8>, Vec<Vec<u8>>)>) -> Found {
        found.and_then(|(key, mut values)| {
            let value = values.pop()?;
            Some((Position::new(key, values.len()), value))
        })
    }

    fn at_index(key: &[u8], values: Option<Vec<Vec<u8>>>, index: usize) -> Found {
        let mut values = values?;
        (index < values.len()).then(|| (Position::new(key.to_vec(), index), values.swap_remove(index)))
    }

    /// Index of `value` among `values`: the equal one, or with `range` on a
    /// sorted store the first one not smaller.
    fn find_dup(&self, values: &[Vec<u8>], value: &[u8], range: bool) -> Option<usize> {
        let inner = &self.store.inner;
        match inner.config.duplicates {
            Duplicates::Sorted => values.iter().position(|candidate| {
                let ordering = inner.dup_compare(candidate, value);
                if range {
                    ordering.is_ge()
                } else {
                    ordering.is_eq()
                }
            }),
            _ => values.iter().position(|candidate| candidate == value),
        }
    }

    /// Finds where `op` leads without moving the cursor.
    fn locate(&self, op: CursorOp<'_>) -> CoreResult<Found> {
        if let Some(txn) = self.txn {
            txn.ensure_active()?;
        }
        let found = match op {
            CursorOp::First => Self::first_of(self.seek(Seek::First)?),
            CursorOp::Last => Self::last_of(self.seek(Seek::Last)?),
            CursorOp::Next => match &self.position {
                None => Self::first_of(self.seek(Seek::First)?),
                Some(position) => {
                    let index = if self.deleted {
                        position.index
                    } else {
                        position.index + 1
                    };
                    match Self::at_index(&position.key, self.read_key(&position.key)?, index) {
                        Some(found) => Some(found),
                        None => Self::first_of(self.seek(Seek::After(position.key.clone()))?),
                    }
                }
            },
            CursorOp::Prev => match &self.position {
                None => Self::last_of(self.seek(Seek::Last)?),
                Some(position) => {
                    let values = self.read_key(&position.key)?;
                    let len = values.as_ref().map_or(0, Vec::len);
                    let index = position.index.min(len).checked_sub(1);
                    match index.and_then(|index| Self::at_index(&position.key, values, index)) {
                        Some(found) => Some(found),
                        None => Self::last_of(self.seek(Seek::Before(position.key.clone()))?),
                    }
                }
            },
            CursorOp::NextDup => {
                let position = self.current_position()?;
                let index = if self.deleted {
                    position.index
                } else {
                    position.index + 1
                };
                Self::at_index(&position.key, self.read_key(&position.key)?, index)
            }
            CursorOp::PrevDup => {
                let position = self.current_position()?;
                match position.index.checked_sub(1) {
                    Some(index) => {
                        Self::at_index(&position.key, self.read_key(&position.key)?, index)
                    }
                    None => None,
                }
            }
            CursorOp::NextNoDup => match &self.position {
                None => Self::first_of(self.seek(Seek::First)?),
                Some(position) => Self::first_of(self.seek(Seek::After(position.key.clone()))?),
            },
            CursorOp::PrevNoDup => match &self.position {
                None => Self::last_of(self.seek(Seek::Last)?),
                Some(position) => Self::last_of(self.seek(Seek::Before(position.key.clone()))?),
            },
            CursorOp::FirstDup => {
                let position = self.current_position()?;
                let values = self.read_key(&position.key)?;
                Self::at_index(&position.key, values, 0)
            }
            CursorOp::LastDup => {
                let position = self.current_position()?;
                let key = position.key.clone();
                Self::last_of(self.read_key(&key)?.map(|values| (key, values)))
            }
            CursorOp::Current => {
                let position = self.current_position()?;
                if self.deleted {
                    None
                } else {
                    Self::at_index(&position.key, self.read_key(&position.key)?, position.index)
                }
            }
            CursorOp::Set(key) => Self::at_index(key, self.read_key(key)?, 0),
            CursorOp::SetRange(key) => Self::first_of(self.seek(Seek::AtOrAfter(key.to_vec()))?),
            CursorOp::GetBoth(key, value) | CursorOp::GetBothRange(key, value) => {
                let range = matches!(op, CursorOp::GetBothRange(..));
                let values = self.read_key(key)?;
                let index = values
                    .as_deref()
                    .and_then(|values| self.find_dup(values, value, range));
                index.and_then(|index| Self::at_index(key, values, index))
            }
            CursorOp::SetRecno(recno) => self.locate_recno(recno)?,
        };
        Ok(found)
    }

    fn locate_recno(&self, recno: RecordNumber) -> CoreResult<Found> {
        let config = self.store.config();
        if config.access == AccessMethod::Recno {
            if recno == 0 {
                return Ok(None);
            }
            let key = recno_key(recno);
            return Ok(Self::at_index(&key, self.read_key(&key)?, 0));
        }
        if !config.has_record_numbers() {
            return Err(self.no_record_numbers());
        }

        let Some(mut remaining) = (recno as usize).checked_sub(1) else {
            return Ok(None);
        };
        let mut seek = Seek::First;
        while let Some((key, values)) = self.seek(seek)? {
            if remaining < values.len() {
                return Ok(Self::at_index(&key, Some(values), remaining));
            }
            remaining -= values.len();
            seek = Seek::After(key);
        }
        Ok(None)
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("store", &self.store.name())
            .field("txn", &self.txn.map(Transaction::id))
            .field("position", &self.position)
            .field("deleted", &self.deleted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvConfig, StoreConfig};
    use crate::error::ErrorKind;
    use crate::Environment;

    fn env() -> Environment {
        Environment::open_in_memory(EnvConfig::default()).unwrap()
    }

    fn pair(key: &str, value: &str) -> Option<(Vec<u8>, Vec<u8>)> {
        Some((key.as_bytes().to_vec(), value.as_bytes().to_vec()))
    }

    fn dup_store(env: &Environment) -> Store {
        let store = env
            .open_store("dups", StoreConfig::btree().duplicates(Duplicates::Sorted))
            .unwrap();
        for (key, value) in [("a", "1"), ("a", "2"), ("a", "3"), ("b", "1"), ("c", "1"), ("c", "2")] {
            store
                .put(None, key.as_bytes(), value.as_bytes(), PutFlags::Replace)
                .unwrap();
        }
        store
    }

    #[test]
    fn walks_forward_and_backward() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();

        let mut forward = Vec::new();
        while let Some(item) = cursor.get(CursorOp::Next).unwrap() {
            forward.push(item);
        }
        assert_eq!(forward.len(), 6);
        assert_eq!(forward[0], pair("a", "1").unwrap());
        assert_eq!(forward[5], pair("c", "2").unwrap());

        let mut cursor = store.cursor(None).unwrap();
        let mut backward = Vec::new();
        while let Some(item) = cursor.get(CursorOp::Prev).unwrap() {
            backward.push(item);
        }
        forward.reverse();
        assert_eq!(backward, forward);
    }

    #[test]
    fn duplicate_navigation() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();

        assert_eq!(cursor.get(CursorOp::Set(b"a")).unwrap(), pair("a", "1"));
        assert_eq!(cursor.count().unwrap(), 3);
        assert_eq!(cursor.get(CursorOp::NextDup).unwrap(), pair("a", "2"));
        assert_eq!(cursor.get(CursorOp::LastDup).unwrap(), pair("a", "3"));
        assert_eq!(cursor.get(CursorOp::NextDup).unwrap(), None);
        assert_eq!(cursor.get(CursorOp::Current).unwrap(), pair("a", "3"));
        assert_eq!(cursor.get(CursorOp::FirstDup).unwrap(), pair("a", "1"));
        assert_eq!(cursor.get(CursorOp::NextNoDup).unwrap(), pair("b", "1"));
        assert_eq!(cursor.get(CursorOp::PrevNoDup).unwrap(), pair("a", "3"));
        assert_eq!(cursor.get(CursorOp::PrevDup).unwrap(), pair("a", "2"));
    }

    #[test]
    fn lookups_keep_position_when_missing() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();

        assert_eq!(cursor.get(CursorOp::Set(b"b")).unwrap(), pair("b", "1"));
        assert_eq!(cursor.get(CursorOp::Set(b"zz")).unwrap(), None);
        assert_eq!(cursor.get(CursorOp::Current).unwrap(), pair("b", "1"));
        assert_eq!(cursor.get(CursorOp::SetRange(b"bb")).unwrap(), pair("c", "1"));
        assert_eq!(cursor.get(CursorOp::GetBoth(b"a", b"2")).unwrap(), pair("a", "2"));
        assert_eq!(cursor.get(CursorOp::GetBoth(b"a", b"9")).unwrap(), None);
        assert_eq!(
            cursor.get(CursorOp::GetBothRange(b"c", b"15")).unwrap(),
            pair("c", "2")
        );
    }

    #[test]
    fn unpositioned_cursor_rejects_relative_ops() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();
        for op in [CursorOp::Current, CursorOp::NextDup, CursorOp::FirstDup] {
            assert_eq!(cursor.get(op).unwrap_err().kind(), ErrorKind::NotFound);
        }
        assert_eq!(cursor.del().unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            cursor.put(b"a", b"x", PutFlags::Current).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn next_after_delete_continues_in_place() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();
        cursor.get(CursorOp::Set(b"a")).unwrap();
        cursor.get(CursorOp::NextDup).unwrap();
        cursor.del().unwrap();
        assert_eq!(cursor.get(CursorOp::Current).unwrap(), None);
        assert_eq!(cursor.get(CursorOp::Next).unwrap(), pair("a", "3"));
        assert_eq!(
            store.get_all(None, b"a").unwrap(),
            vec![b"1".to_vec(), b"3".to_vec()]
        );
    }

    #[test]
    fn put_before_and_after_on_unsorted_duplicates() {
        let env = env();
        let store = env
            .open_store("list", StoreConfig::btree().duplicates(Duplicates::Unsorted))
            .unwrap();
        let mut cursor = store.cursor(None).unwrap();
        cursor.put(b"k", b"m", PutFlags::KeyLast).unwrap();
        cursor.put(b"", b"l", PutFlags::Before).unwrap();
        assert_eq!(cursor.get(CursorOp::Current).unwrap(), pair("k", "l"));
        cursor.get(CursorOp::LastDup).unwrap();
        cursor.put(b"", b"n", PutFlags::After).unwrap();
        cursor.put(b"", b"N", PutFlags::Current).unwrap();
        assert_eq!(
            store.get_all(None, b"k").unwrap(),
            vec![b"l".to_vec(), b"m".to_vec(), b"N".to_vec()]
        );
    }

    #[test]
    fn put_many_appends_duplicates() {
        let env = env();
        let store = env
            .open_store("list", StoreConfig::btree().duplicates(Duplicates::Unsorted))
            .unwrap();
        let mut cursor = store.cursor(None).unwrap();
        cursor.put_many(b"k", [b"x", b"y", b"z"]).unwrap();
        assert_eq!(cursor.get(CursorOp::Current).unwrap(), pair("k", "z"));
        assert_eq!(cursor.count().unwrap(), 3);
    }

    #[test]
    fn record_numbers_on_btree() {
        let env = env();
        let store = env
            .open_store(
                "numbered",
                StoreConfig::btree()
                    .duplicates(Duplicates::Sorted)
                    .record_numbers(true),
            )
            .unwrap();
        for (key, value) in [("a", "1"), ("a", "2"), ("b", "1")] {
            store
                .put(None, key.as_bytes(), value.as_bytes(), PutFlags::Replace)
                .unwrap();
        }
        let mut cursor = store.cursor(None).unwrap();
        assert_eq!(cursor.get(CursorOp::SetRecno(3)).unwrap(), pair("b", "1"));
        assert_eq!(cursor.recno().unwrap(), 3);
        assert_eq!(cursor.get(CursorOp::SetRecno(2)).unwrap(), pair("a", "2"));
        assert_eq!(cursor.recno().unwrap(), 2);
        assert_eq!(cursor.get(CursorOp::SetRecno(4)).unwrap(), None);
        assert_eq!(cursor.get(CursorOp::SetRecno(0)).unwrap(), None);
    }

    #[test]
    fn recno_store_append_and_lookup() {
        let env = env();
        let store = env.open_store("queue", StoreConfig::recno()).unwrap();
        assert_eq!(store.append(None, b"first").unwrap(), 1);
        assert_eq!(store.append(None, b"second").unwrap(), 2);
        let mut cursor = store.cursor(None).unwrap();
        let (key, value) = cursor.get(CursorOp::SetRecno(2)).unwrap().unwrap();
        assert_eq!(key, recno_key(2));
        assert_eq!(value, b"second");
        assert_eq!(cursor.recno().unwrap(), 2);
    }

    #[test]
    fn bulk_reads_match_single_steps() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();
        let mut seen = Vec::new();
        while let Some(batch) = cursor.get_bulk(entry_size(1, 1) * 4, BulkDirection::Forward).unwrap() {
            assert!(batch.len() <= 4);
            seen.extend(batch.iter().map(|(k, v)| (k.to_vec(), v.to_vec())));
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[4], pair("c", "1").unwrap());
    }

    #[test]
    fn bulk_buffer_too_small() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();
        let err = cursor.get_bulk(4, BulkDirection::Forward).unwrap_err();
        assert!(matches!(err, CoreError::BufferTooSmall { needed: 10, capacity: 4 }));
        assert!(!cursor.is_positioned());
    }

    #[test]
    fn bulk_duplicates_start_at_current() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();
        cursor.get(CursorOp::Set(b"a")).unwrap();
        let batch = cursor
            .get_bulk(entry_size(1, 1) * 2, BulkDirection::Duplicates)
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 2);
        let batch = cursor
            .get_bulk(64, BulkDirection::Duplicates)
            .unwrap()
            .unwrap();
        let values: Vec<_> = batch.iter().map(|(_, v)| v.to_vec()).collect();
        assert_eq!(values, vec![b"3".to_vec()]);
        assert!(cursor.get_bulk(64, BulkDirection::Duplicates).unwrap().is_none());
    }

    #[test]
    fn bulk_duplicates_after_put_include_written_item() {
        let env = env();
        let store = env
            .open_store("list", StoreConfig::btree().duplicates(Duplicates::Unsorted))
            .unwrap();
        store.put(None, b"k", b"1", PutFlags::KeyLast).unwrap();
        let mut cursor = store.cursor(None).unwrap();
        cursor.get(CursorOp::Set(b"k")).unwrap();
        assert_eq!(
            cursor.get_bulk(64, BulkDirection::Duplicates).unwrap().unwrap().len(),
            1
        );

        cursor.put(b"k", b"2", PutFlags::KeyLast).unwrap();
        let batch = cursor
            .get_bulk(64, BulkDirection::Duplicates)
            .unwrap()
            .unwrap();
        let values: Vec<_> = batch.iter().map(|(_, v)| v.to_vec()).collect();
        assert_eq!(values, vec![b"2".to_vec()]);
    }

    #[test]
    fn bulk_with_unbounded_capacity() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();
        let batch = cursor
            .get_bulk(usize::MAX, BulkDirection::Forward)
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 6);
        assert!(cursor.get_bulk(usize::MAX, BulkDirection::Forward).unwrap().is_none());
    }

    #[test]
    fn bulk_backward_matches_prev_walk() {
        let env = env();
        let store = dup_store(&env);
        let mut cursor = store.cursor(None).unwrap();
        let mut walked = Vec::new();
        while let Some(item) = cursor.get(CursorOp::Prev).unwrap() {
            walked.push(item);
        }

        let mut cursor = store.cursor(None).unwrap();
        let mut bulk = Vec::new();
        while let Some(batch) = cursor.get_bulk(entry_size(1, 1) * 4, BulkDirection::Backward).unwrap() {
            bulk.extend(batch.iter().map(|(k, v)| (k.to_vec(), v.to_vec())));
        }
        assert_eq!(bulk, walked);
        assert_eq!(bulk[0], pair("c", "2").unwrap());
    }

    #[test]
    fn hash_store_lookups_and_scans() {
        let env = env();
        let store = env.open_store("hashed", StoreConfig::hash()).unwrap();
        for (key, value) in [("apple", "1"), ("pear", "2"), ("plum", "3"), ("fig", "4")] {
            store
                .put(None, key.as_bytes(), value.as_bytes(), PutFlags::Replace)
                .unwrap();
        }
        store.put(None, b"pear", b"22", PutFlags::Replace).unwrap();
        assert_eq!(
            store.put(None, b"fig", b"x", PutFlags::NoOverwrite).unwrap_err().kind(),
            ErrorKind::KeyExists
        );

        let mut cursor = store.cursor(None).unwrap();
        assert_eq!(cursor.get(CursorOp::Set(b"pear")).unwrap(), pair("pear", "22"));
        assert_eq!(cursor.get(CursorOp::Set(b"kiwi")).unwrap(), None);

        let mut cursor = store.cursor(None).unwrap();
        let mut forward = Vec::new();
        while let Some(item) = cursor.get(CursorOp::Next).unwrap() {
            forward.push(item);
        }
        let mut keys: Vec<_> = forward.iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![b"apple".to_vec(), b"fig".to_vec(), b"pear".to_vec(), b"plum".to_vec()]
        );

        let mut backward = Vec::new();
        let mut cursor = store.cursor(None).unwrap();
        while let Some(item) = cursor.get(CursorOp::Prev).unwrap() {
            backward.push(item);
        }
        backward.reverse();
        assert_eq!(backward, forward);

        cursor.get(CursorOp::Set(b"plum")).unwrap();
        cursor.del().unwrap();
        assert_eq!(store.get(None, b"plum").unwrap(), None);
        assert_eq!(store.len(None).unwrap(), 3);
    }

    #[test]
    fn transactional_cursor_sees_own_writes() {
        let env = env();
        let store = dup_store(&env);
        let txn = env.begin(None).unwrap();
        {
            let mut cursor = store.cursor(Some(&txn)).unwrap();
            cursor.put(b"bb", b"1", PutFlags::Replace).unwrap();
            assert_eq!(cursor.get(CursorOp::Set(b"b")).unwrap(), pair("b", "1"));
            assert_eq!(cursor.get(CursorOp::Next).unwrap(), pair("bb", "1"));
            cursor.get(CursorOp::Set(b"c")).unwrap();
            cursor.del().unwrap();
            assert_eq!(cursor.get(CursorOp::Next).unwrap(), pair("c", "2"));
            cursor.close().unwrap();
        }
        assert_eq!(store.get(None, b"bb").unwrap(), None);
        txn.abort().unwrap();
        assert_eq!(store.len(None).unwrap(), 6);
    }
}
