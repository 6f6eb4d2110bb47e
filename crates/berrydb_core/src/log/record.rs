//! Log record types and serialization.

use crate::codec::{compute_crc32, put_bytes, put_values, Reader};
use crate::error::{CoreError, CoreResult};
use crate::types::{SequenceNumber, StoreId, TransactionId};

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"BLOG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Envelope header: magic (4) + version (2) + type (1) + length (4).
pub(crate) const HEADER_SIZE: usize = 11;

/// Trailing CRC size.
pub(crate) const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Post-image of one key.
    Put = 1,
    /// Deletion of one key.
    Delete = 2,
    /// Commit of a transaction.
    Commit = 3,
    /// Checkpoint marker.
    Checkpoint = 4,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            3 => Some(Self::Commit),
            4 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A logged change.
///
/// Puts carry the full post-image of a key (every duplicate, in order), so
/// replay never depends on the previous contents of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A key now holds exactly `values`.
    Put {
        /// Transaction ID.
        txid: TransactionId,
        /// Store holding the key.
        store_id: StoreId,
        /// The key.
        key: Vec<u8>,
        /// Every value of the key, in duplicate order.
        values: Vec<Vec<u8>>,
    },

    /// A key no longer exists.
    Delete {
        /// Transaction ID.
        txid: TransactionId,
        /// Store holding the key.
        store_id: StoreId,
        /// The key.
        key: Vec<u8>,
    },

    /// Commit a transaction.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
    },

    /// Checkpoint marker.
    Checkpoint {
        /// Last commit sequence included in the checkpoint image.
        sequence: SequenceNumber,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Put { .. } => LogRecordType::Put,
            Self::Delete { .. } => LogRecordType::Delete,
            Self::Commit { .. } => LogRecordType::Commit,
            Self::Checkpoint { .. } => LogRecordType::Checkpoint,
        }
    }

    /// Returns the transaction ID if this record is associated with one.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Put { txid, .. } | Self::Delete { txid, .. } | Self::Commit { txid, .. } => {
                Some(*txid)
            }
            Self::Checkpoint { .. } => None,
        }
    }

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Put {
                txid,
                store_id,
                key,
                values,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&store_id.as_u32().to_le_bytes());
                put_bytes(&mut buf, key)?;
                put_values(&mut buf, values)?;
            }
            Self::Delete {
                txid,
                store_id,
                key,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&store_id.as_u32().to_le_bytes());
                put_bytes(&mut buf, key)?;
            }
            Self::Commit { txid, sequence } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
            Self::Checkpoint { sequence } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut r = Reader::new(payload, CoreError::log_corruption);
        let record = match record_type {
            LogRecordType::Put => Self::Put {
                txid: TransactionId::new(r.u64()?),
                store_id: StoreId::new(r.u32()?),
                key: r.bytes()?,
                values: r.values()?,
            },
            LogRecordType::Delete => Self::Delete {
                txid: TransactionId::new(r.u64()?),
                store_id: StoreId::new(r.u32()?),
                key: r.bytes()?,
            },
            LogRecordType::Commit => Self::Commit {
                txid: TransactionId::new(r.u64()?),
                sequence: SequenceNumber::new(r.u64()?),
            },
            LogRecordType::Checkpoint => Self::Checkpoint {
                sequence: SequenceNumber::new(r.u64()?),
            },
        };
        r.finish(&format!("{record_type:?} record"))?;
        Ok(record)
    }

    /// Serializes the record with its envelope: header, payload, CRC32 over
    /// everything before it.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("log record payload too large"))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}
