//! Checkpoint images, thresholds and log archive modes.
//!
//! A checkpoint image holds the committed contents of every store as of one
//! commit sequence, plus the number of the first log file recovery has to
//! read. Log files numbered below it are no longer needed.

use crate::codec::{compute_crc32, put_bytes, put_values, Reader};
use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, SequenceNumber, StoreId};
use std::time::Duration;

/// Magic bytes for checkpoint images.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"BCKP";

/// Current checkpoint image version.
pub const CHECKPOINT_VERSION: u16 = 1;

/// Entries of one store: each key with its values in duplicate order.
pub type StoreImage = Vec<(Vec<u8>, Vec<Vec<u8>>)>;

/// Committed contents of all stores at one commit sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointImage {
    /// Last commit sequence included.
    pub sequence: SequenceNumber,
    /// First log file recovery must read.
    pub start_file: u32,
    /// Highest transaction ID issued when the image was taken.
    pub last_txid: u64,
    /// Contents of every store, by store ID.
    pub stores: Vec<(StoreId, StoreImage)>,
}

impl CheckpointImage {
    /// Encodes the image, followed by a CRC32 of everything before it.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&CHECKPOINT_MAGIC);
        buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.start_file.to_le_bytes());
        buf.extend_from_slice(&self.last_txid.to_le_bytes());

        let store_count = u32::try_from(self.stores.len())
            .map_err(|_| CoreError::invalid_operation("too many stores"))?;
        buf.extend_from_slice(&store_count.to_le_bytes());
        for (id, entries) in &self.stores {
            buf.extend_from_slice(&id.as_u32().to_le_bytes());
            let entry_count = u64::try_from(entries.len())
                .map_err(|_| CoreError::invalid_operation("too many entries"))?;
            buf.extend_from_slice(&entry_count.to_le_bytes());
            for (key, values) in entries {
                put_bytes(&mut buf, key)?;
                put_values(&mut buf, values)?;
            }
        }

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes an image, verifying its checksum.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 4 {
            return Err(CoreError::invalid_format("checkpoint image too short"));
        }
        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(crc_bytes);
        let expected = u32::from_le_bytes(crc);
        let actual = compute_crc32(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let mut r = Reader::new(body, CoreError::invalid_format);
        if r.raw(4)? != CHECKPOINT_MAGIC {
            return Err(CoreError::invalid_format("invalid checkpoint magic"));
        }
        let version = r.u16()?;
        if version > CHECKPOINT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported checkpoint version: {version}"
            )));
        }
        let sequence = SequenceNumber::new(r.u64()?);
        let start_file = r.u32()?;
        let last_txid = r.u64()?;

        let store_count = r.u32()?;
        let mut stores = Vec::new();
        for _ in 0..store_count {
            let id = StoreId::new(r.u32()?);
            let entry_count = r.u64()?;
            let mut entries = Vec::new();
            for _ in 0..entry_count {
                let key = r.bytes()?;
                let values = r.values()?;
                entries.push((key, values));
            }
            stores.push((id, entries));
        }
        r.finish("checkpoint image")?;

        Ok(Self {
            sequence,
            start_file,
            last_txid,
            stores,
        })
    }
}

/// Thresholds deciding whether a checkpoint attempt does any work.
///
/// Unless `force` is set, an attempt is skipped when nothing was logged since
/// the previous checkpoint. With both thresholds disabled, any logged change
/// is enough; otherwise at least one enabled threshold must be met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointOptions {
    /// Minimum bytes logged since the previous checkpoint (0 disables).
    pub min_log_bytes: u64,
    /// Minimum time since the previous checkpoint (zero disables).
    pub min_interval: Duration,
    /// Checkpoint even if no threshold is met and nothing was logged.
    pub force: bool,
}

impl CheckpointOptions {
    /// Options that always take a checkpoint.
    #[must_use]
    pub const fn forced() -> Self {
        Self {
            min_log_bytes: 0,
            min_interval: Duration::ZERO,
            force: true,
        }
    }

    /// Sets the logged-bytes threshold.
    #[must_use]
    pub const fn min_log_bytes(mut self, bytes: u64) -> Self {
        self.min_log_bytes = bytes;
        self
    }

    /// Sets the elapsed-time threshold.
    #[must_use]
    pub const fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sets the force flag.
    #[must_use]
    pub const fn force(mut self, value: bool) -> Self {
        self.force = value;
        self
    }

    /// Decides whether to checkpoint given the bytes logged and the time
    /// elapsed since the previous checkpoint (`None` if there was none).
    #[must_use]
    pub fn should_run(&self, logged_bytes: u64, since_last: Option<Duration>) -> bool {
        if self.force {
            return true;
        }
        if logged_bytes == 0 {
            return false;
        }
        let by_bytes = self.min_log_bytes > 0;
        let by_time = !self.min_interval.is_zero();
        if !by_bytes && !by_time {
            return true;
        }
        (by_bytes && logged_bytes >= self.min_log_bytes)
            || (by_time && since_last.map_or(true, |elapsed| elapsed >= self.min_interval))
    }
}

/// Outcome of a checkpoint that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Last commit sequence included in the image.
    pub sequence: SequenceNumber,
    /// Position of the checkpoint record in the log.
    pub lsn: Lsn,
    /// First log file recovery now needs.
    pub start_file: u32,
}

/// How [`crate::Environment::log_archive`] reports file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Bare file names relative to the environment home.
    Relative,
    /// Absolute paths (bare names for in-memory environments).
    Absolute,
}
