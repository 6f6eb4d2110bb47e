//! Bulk retrieval buffers.

/// Which records a bulk read collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkDirection {
    /// Following records in key order.
    #[default]
    Forward,
    /// Preceding records in reverse key order.
    Backward,
    /// Duplicates of the current key only.
    Duplicates,
}

/// Bytes one key/value pair occupies in a batch.
pub(crate) const fn entry_size(key_len: usize, value_len: usize) -> usize {
    8 + key_len + value_len
}

/// Largest up-front reservation of a batch buffer; it grows past this as
/// pairs are pushed.
const INITIAL_RESERVE: usize = 4096;

/// A bounded buffer of key/value pairs filled by
/// [`Cursor::get_bulk`](crate::Cursor::get_bulk).
///
/// Each pair is stored as a little-endian `u32` key length, the key, a
/// little-endian `u32` value length and the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkBatch {
    buf: Vec<u8>,
    capacity: usize,
    count: usize,
}

impl BulkBatch {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.min(INITIAL_RESERVE)),
            capacity,
            count: 0,
        }
    }

    /// Adds a pair if it fits, returning false otherwise.
    pub(crate) fn try_push(&mut self, key: &[u8], value: &[u8]) -> bool {
        let needed = entry_size(key.len(), value.len());
        if needed > self.capacity - self.buf.len() {
            return false;
        }
        for part in [key, value] {
            self.buf.extend_from_slice(&(part.len() as u32).to_le_bytes());
            self.buf.extend_from_slice(part);
        }
        self.count += 1;
        true
    }

    /// Number of pairs in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the batch holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Buffer capacity the batch was filled against.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes used.
    #[must_use]
    pub fn used(&self) -> usize {
        self.buf.len()
    }

    /// Iterates over the pairs in retrieval order.
    #[must_use]
    pub fn iter(&self) -> BulkIter<'_> {
        BulkIter {
            buf: &self.buf,
            pos: 0,
        }
    }
}

impl<'a> IntoIterator for &'a BulkBatch {
    type Item = (&'a [u8], &'a [u8]);
    type IntoIter = BulkIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the pairs of a [`BulkBatch`].
#[derive(Debug, Clone)]
pub struct BulkIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BulkIter<'a> {
    fn field(&mut self) -> Option<&'a [u8]> {
        let len_bytes = self.buf.get(self.pos..self.pos + 4)?;
        let len = u32::from_le_bytes(len_bytes.try_into().ok()?) as usize;
        let start = self.pos + 4;
        let field = self.buf.get(start..start + len)?;
        self.pos = start + len;
        Some(field)
    }
}

impl<'a> Iterator for BulkIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.field()?;
        let value = self.field()?;
        Some((key, value))
    }
}
