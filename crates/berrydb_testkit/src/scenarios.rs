//! End-to-end scenarios.
//!
//! Each scenario sets up its stores on a caller-supplied environment so it
//! can run against both in-memory and directory environments.

use berrydb_core::{
    CoreResult, CursorOp, Duplicates, Environment, Extracted, JoinFlags, PutFlags, Store,
    StoreConfig,
};
use std::sync::Arc;

/// Key written twice by [`write_duplicate_entries`].
pub const NEW_KEY: &[u8] = b"new key";

/// Writes `"entry #1"` as the first and `"entry #2"` as the last duplicate
/// of [`NEW_KEY`] through a cursor, then returns the duplicates in forward
/// scan order.
pub fn write_duplicate_entries(env: &Environment) -> CoreResult<Vec<Vec<u8>>> {
    let store = env.open_store(
        "entries",
        StoreConfig::btree().duplicates(Duplicates::Unsorted),
    )?;
    env.with_retry(|txn| {
        let mut cursor = store.cursor(Some(txn))?;
        cursor.put(NEW_KEY, b"entry #1", PutFlags::KeyFirst)?;
        cursor.put(NEW_KEY, b"entry #2", PutFlags::KeyLast)?;
        cursor.close()
    })?;

    let mut cursor = store.cursor(None)?;
    let mut values = Vec::new();
    let mut op = CursorOp::Set(NEW_KEY);
    while let Some((_, value)) = cursor.get(op)? {
        values.push(value);
        op = CursorOp::NextDup;
    }
    Ok(values)
}

/// A student record, stored as `last|first|major` under its 4-byte ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    /// Four-byte student ID, the primary key.
    pub id: [u8; 4],
    /// Last name, the secondary key.
    pub last_name: String,
    /// First name.
    pub first_name: String,
    /// Major subject.
    pub major: String,
}

impl Student {
    /// Creates a student record.
    pub fn new(id: &[u8; 4], last_name: &str, first_name: &str, major: &str) -> Self {
        Self {
            id: *id,
            last_name: last_name.to_string(),
            first_name: first_name.to_string(),
            major: major.to_string(),
        }
    }

    /// Encodes the stored value.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}|{}|{}", self.last_name, self.first_name, self.major).into_bytes()
    }

    /// Decodes a stored record.
    pub fn decode(id: &[u8], value: &[u8]) -> Option<Self> {
        let id: [u8; 4] = id.try_into().ok()?;
        let text = std::str::from_utf8(value).ok()?;
        let mut fields = text.splitn(3, '|');
        Some(Self {
            id,
            last_name: fields.next()?.to_string(),
            first_name: fields.next()?.to_string(),
            major: fields.next()?.to_string(),
        })
    }
}

/// Extracts the last-name field of a student record.
pub fn last_name_extractor(_id: &[u8], value: &[u8]) -> Extracted {
    match value.split(|b| *b == b'|').next() {
        Some(last) if !last.is_empty() => Extracted::Key(last.to_vec()),
        _ => Extracted::Skip,
    }
}

/// The student stores.
#[derive(Debug, Clone)]
pub struct StudentStores {
    /// Students keyed by ID.
    pub students: Store,
    /// Secondary index by last name.
    pub by_last_name: Store,
}

impl StudentStores {
    /// Opens both stores and associates the index.
    pub fn open(env: &Environment) -> CoreResult<Self> {
        let students = env.open_store("students", StoreConfig::btree())?;
        let by_last_name = env.open_store(
            "lastname",
            StoreConfig::btree().duplicates(Duplicates::Sorted),
        )?;
        env.associate(&students, &by_last_name, Arc::new(last_name_extractor))?;
        Ok(Self {
            students,
            by_last_name,
        })
    }

    /// Inserts a student in its own transaction.
    pub fn insert(&self, env: &Environment, student: &Student) -> CoreResult<()> {
        env.with_retry(|txn| {
            self.students
                .put(Some(txn), &student.id, &student.encode(), PutFlags::NoOverwrite)
        })
    }

    /// Returns the IDs of every student with `last_name`, in ID order.
    pub fn ids_by_last_name(&self, last_name: &str) -> CoreResult<Vec<Vec<u8>>> {
        self.by_last_name.get_all(None, last_name.as_bytes())
    }
}

/// The car lot used to exercise joins: cars keyed by plate, indexed by
/// color and by make.
#[derive(Debug, Clone)]
pub struct CarLot {
    /// Cars keyed by plate; values are `color|make`.
    pub cars: Store,
    /// Secondary index by color.
    pub by_color: Store,
    /// Secondary index by make.
    pub by_make: Store,
}

impl CarLot {
    /// Opens the stores, associates both indexes and parks `cars`.
    pub fn open(env: &Environment, cars: &[(&str, &str, &str)]) -> CoreResult<Self> {
        let lot = Self {
            cars: env.open_store("cars", StoreConfig::btree())?,
            by_color: env.open_store(
                "cars_by_color",
                StoreConfig::btree().duplicates(Duplicates::Sorted),
            )?,
            by_make: env.open_store(
                "cars_by_make",
                StoreConfig::btree().duplicates(Duplicates::Sorted),
            )?,
        };
        env.associate(&lot.cars, &lot.by_color, Arc::new(|_: &[u8], v: &[u8]| field(v, 0)))?;
        env.associate(&lot.cars, &lot.by_make, Arc::new(|_: &[u8], v: &[u8]| field(v, 1)))?;
        env.with_retry(|txn| {
            for (plate, color, make) in cars {
                let value = format!("{color}|{make}");
                lot.cars
                    .put(Some(txn), plate.as_bytes(), value.as_bytes(), PutFlags::Replace)?;
            }
            Ok(())
        })?;
        Ok(lot)
    }

    /// Returns the plates of cars with both `color` and `make`, in join
    /// order.
    pub fn plates(&self, env: &Environment, color: &str, make: &str) -> CoreResult<Vec<String>> {
        let txn = env.begin(None)?;
        let plates = {
            let mut color_cursor = self.by_color.cursor(Some(&txn))?;
            let mut make_cursor = self.by_make.cursor(Some(&txn))?;
            if color_cursor.get(CursorOp::Set(color.as_bytes()))?.is_none()
                || make_cursor.get(CursorOp::Set(make.as_bytes()))?.is_none()
            {
                Vec::new()
            } else {
                let mut join = self.cars.join(
                    vec![color_cursor, make_cursor],
                    JoinFlags::new().item_only(true),
                )?;
                let mut plates = Vec::new();
                while let Some((plate, _)) = join.next()? {
                    plates.push(String::from_utf8_lossy(&plate).into_owned());
                }
                for cursor in join.close() {
                    cursor.close()?;
                }
                plates
            }
        };
        txn.commit()?;
        Ok(plates)
    }
}

fn field(value: &[u8], index: usize) -> Extracted {
    match value.split(|b| *b == b'|').nth(index) {
        Some(f) if !f.is_empty() => Extracted::Key(f.to_vec()),
        _ => Extracted::Skip,
    }
}
