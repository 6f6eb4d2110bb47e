//! Record reader over the bytes of one log file.

use crate::codec::compute_crc32;
use crate::error::{CoreError, CoreResult};
use crate::log::record::{LogRecord, LogRecordType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};

/// Iterates the records of one log file.
///
/// - A record cut short by the end of the data (a torn write) ends the
///   iteration normally; [`LogFileReader::valid_len`] then tells where the
///   last complete record ends.
/// - Bad magic, an unknown version or type, and CRC mismatches are errors.
pub struct LogFileReader<'a> {
    data: &'a [u8],
    offset: usize,
    torn: bool,
    finished: bool,
}

impl<'a> LogFileReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            torn: false,
            finished: false,
        }
    }

    /// Length of the prefix made of complete records read so far.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset as u64
    }

    /// Returns true if iteration stopped at an incomplete record.
    #[must_use]
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, LogRecord)>> {
        let rest = &self.data[self.offset..];
        if rest.is_empty() {
            return Ok(None);
        }
        if rest.len() < HEADER_SIZE {
            self.torn = true;
            return Ok(None);
        }

        if rest[..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption(format!(
                "invalid magic at offset {}",
                self.offset
            )));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != LOG_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported log version {version} at offset {}",
                self.offset
            )));
        }
        let record_type = LogRecordType::from_byte(rest[6]).ok_or_else(|| {
            CoreError::log_corruption(format!(
                "unknown record type {} at offset {}",
                rest[6], self.offset
            ))
        })?;
        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < total {
            self.torn = true;
            return Ok(None);
        }

        let body = &rest[..HEADER_SIZE + len];
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&rest[HEADER_SIZE + len..total]);
        let expected = u32::from_le_bytes(crc_bytes);
        let actual = compute_crc32(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = LogRecord::decode_payload(record_type, &body[HEADER_SIZE..])?;
        let at = self.offset as u64;
        self.offset += total;
        Ok(Some((at, record)))
    }
}

impl Iterator for LogFileReader<'_> {
    type Item = CoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SequenceNumber, StoreId, TransactionId};

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for record in [
            LogRecord::Delete {
                txid: TransactionId::new(1),
                store_id: StoreId::new(2),
                key: b"k".to_vec(),
            },
            LogRecord::Commit {
                txid: TransactionId::new(1),
                sequence: SequenceNumber::new(1),
            },
        ] {
            data.extend(record.encode().unwrap());
        }
        data
    }

    #[test]
    fn reads_all_records_with_offsets() {
        let data = sample();
        let mut reader = LogFileReader::new(&data);
        let records: Vec<_> = reader.by_ref().collect::<CoreResult<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, 0);
        assert!(records[1].0 > 0);
        assert!(!reader.is_torn());
        assert_eq!(reader.valid_len(), data.len() as u64);
    }

    #[test]
    fn torn_tail_ends_iteration() {
        let data = sample();
        let cut = &data[..data.len() - 3];
        let mut reader = LogFileReader::new(cut);
        let records: Vec<_> = reader.by_ref().collect::<CoreResult<_>>().unwrap();
        assert_eq!(records.len(), 1);
        assert!(reader.is_torn());
        assert_eq!(reader.valid_len(), first_len(&data));
    }

    fn first_len(data: &[u8]) -> u64 {
        let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
        (HEADER_SIZE + len + CRC_SIZE) as u64
    }

    #[test]
    fn crc_mismatch_is_an_error() {
        let mut data = sample();
        data[HEADER_SIZE] ^= 0xFF;
        let mut reader = LogFileReader::new(&data);
        assert!(matches!(
            reader.next(),
            Some(Err(CoreError::ChecksumMismatch { .. }))
        ));
        assert!(reader.next().is_none());
    }
}
