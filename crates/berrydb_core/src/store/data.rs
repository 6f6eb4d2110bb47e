//! Ordered entry containers.

use crate::config::{AccessMethod, Comparator, StoreConfig};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Order of keys inside one store.
#[derive(Clone)]
pub(crate) enum KeyOrder {
    /// Lexicographic byte order.
    Bytewise,
    /// Caller-supplied comparator.
    Custom(Comparator),
    /// Hash of the key, then bytes to break ties.
    Hashed,
}

impl KeyOrder {
    pub(crate) fn for_config(config: &StoreConfig) -> Self {
        match (config.access, &config.key_compare) {
            (AccessMethod::Hash, _) => Self::Hashed,
            (_, Some(compare)) => Self::Custom(compare.clone()),
            _ => Self::Bytewise,
        }
    }

    pub(crate) fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Bytewise => a.cmp(b),
            Self::Custom(compare) => compare(a, b),
            Self::Hashed => hash_key(a).cmp(&hash_key(b)).then_with(|| a.cmp(b)),
        }
    }
}

fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Where to start looking in an ordered container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Seek {
    First,
    Last,
    /// Smallest key strictly greater.
    After(Vec<u8>),
    /// Largest key strictly smaller.
    Before(Vec<u8>),
    /// Smallest key greater or equal.
    AtOrAfter(Vec<u8>),
}

impl Seek {
    pub(crate) fn is_forward(&self) -> bool {
        !matches!(self, Self::Last | Self::Before(_))
    }

    /// The seek that continues past `key` in the same direction.
    pub(crate) fn past(&self, key: Vec<u8>) -> Self {
        if self.is_forward() {
            Self::After(key)
        } else {
            Self::Before(key)
        }
    }
}

/// Entries kept sorted by a [`KeyOrder`] supplied on every call.
///
/// The order is not stored so that the same container type serves committed
/// data and per-transaction overlays.
#[derive(Debug, Clone)]
pub(crate) struct SortedMap<V> {
    entries: Vec<(Vec<u8>, V)>,
}

impl<V> Default for SortedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> SortedMap<V> {
    /// Builds a map from entries in any order.
    pub(crate) fn from_entries(order: &KeyOrder, mut entries: Vec<(Vec<u8>, V)>) -> Self {
        entries.sort_by(|(a, _), (b, _)| order.compare(a, b));
        Self { entries }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn search(&self, order: &KeyOrder, key: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(probe, _)| order.compare(probe, key))
    }

    pub(crate) fn get(&self, order: &KeyOrder, key: &[u8]) -> Option<&V> {
        self.search(order, key).ok().map(|i| &self.entries[i].1)
    }

    /// Inserts or replaces, returning the previous value.
    pub(crate) fn insert(&mut self, order: &KeyOrder, key: Vec<u8>, value: V) -> Option<V> {
        match self.search(order, &key) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            Err(i) => {
                self.entries.insert(i, (key, value));
                None
            }
        }
    }

    pub(crate) fn remove(&mut self, order: &KeyOrder, key: &[u8]) -> Option<V> {
        self.search(order, key)
            .ok()
            .map(|i| self.entries.remove(i).1)
    }

    pub(crate) fn seek(&self, order: &KeyOrder, seek: &Seek) -> Option<(&[u8], &V)> {
        let index = match seek {
            Seek::First => Some(0),
            Seek::Last => self.entries.len().checked_sub(1),
            Seek::After(key) => Some(match self.search(order, key) {
                Ok(i) => i + 1,
                Err(i) => i,
            }),
            Seek::Before(key) => match self.search(order, key) {
                Ok(i) | Err(i) => i.checked_sub(1),
            },
            Seek::AtOrAfter(key) => match self.search(order, key) {
                Ok(i) | Err(i) => Some(i),
            },
        }?;
        self.entries
            .get(index)
            .map(|(key, value)| (key.as_slice(), value))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        self.entries.iter().map(|(key, value)| (key.as_slice(), value))
    }

    pub(crate) fn into_entries(self) -> Vec<(Vec<u8>, V)> {
        self.entries
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
