//! Transaction manager: ID allocation, commit and checkpoint.

use crate::checkpoint::{CheckpointImage, CheckpointInfo, CheckpointOptions};
use crate::env::EnvShared;
use crate::error::CoreResult;
use crate::log::{LogManager, LogRecord};
use crate::transaction::state::WriteSet;
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters recovered from the checkpoint image and the log.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RecoveredState {
    pub(crate) last_txid: u64,
    pub(crate) last_sequence: u64,
    pub(crate) checkpoint_start_file: u32,
}

struct CheckpointState {
    last_at: Option<Instant>,
    start_file: u32,
}

/// Allocates transaction IDs and commit sequence numbers, and serializes
/// commits and checkpoints against the log.
///
/// The log mutex is held across log append and store application, so the
/// order of commits in the log is the order in which they become visible and
/// a checkpoint never observes half of a commit.
pub(crate) struct TransactionManager {
    next_txid: AtomicU64,
    next_seq: AtomicU64,
    committed_seq: AtomicU64,
    log: Mutex<LogManager>,
    checkpoints: Mutex<CheckpointState>,
    sync_on_commit: bool,
}

impl TransactionManager {
    pub(crate) fn new(log: LogManager, recovered: RecoveredState, sync_on_commit: bool) -> Self {
        Self {
            next_txid: AtomicU64::new(recovered.last_txid + 1),
            next_seq: AtomicU64::new(recovered.last_sequence + 1),
            committed_seq: AtomicU64::new(recovered.last_sequence),
            log: Mutex::new(log),
            checkpoints: Mutex::new(CheckpointState {
                last_at: None,
                start_file: recovered.checkpoint_start_file,
            }),
            sync_on_commit,
        }
    }

    pub(crate) fn allocate_id(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst))
    }

    /// Sequence number of the latest commit.
    pub(crate) fn committed_sequence(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// First log file the latest checkpoint needs for recovery.
    pub(crate) fn checkpoint_start_file(&self) -> u32 {
        self.checkpoints.lock().start_file
    }

    /// Log file currently appended to.
    pub(crate) fn current_log_file(&self) -> u32 {
        self.log.lock().current_file()
    }

    /// Logs and applies the write set of a top-level transaction.
    ///
    /// Read-only transactions write nothing to the log.
    pub(crate) fn commit(
        &self,
        env: &EnvShared,
        txid: TransactionId,
        writes: &WriteSet,
    ) -> CoreResult<()> {
        let mut store_ids: Vec<_> = writes.keys().copied().collect();
        store_ids.sort_unstable();

        let mut records = Vec::new();
        for store_id in &store_ids {
            for (key, staged) in writes[store_id].iter() {
                records.push(match staged {
                    Some(values) => LogRecord::Put {
                        txid,
                        store_id: *store_id,
                        key: key.to_vec(),
                        values: values.clone(),
                    },
                    None => LogRecord::Delete {
                        txid,
                        store_id: *store_id,
                        key: key.to_vec(),
                    },
                });
            }
        }
        if records.is_empty() {
            return Ok(());
        }

        let mut log = self.log.lock();
        let sequence = SequenceNumber::new(self.next_seq.fetch_add(1, Ordering::SeqCst));
        records.push(LogRecord::Commit { txid, sequence });
        let lsn = log.append_all(&records)?;
        log.flush(self.sync_on_commit)?;

        for store_id in &store_ids {
            if let Some(store) = env.stores.get(*store_id) {
                store.apply(&writes[store_id]);
            }
        }
        self.committed_seq.store(sequence.as_u64(), Ordering::SeqCst);
        tracing::debug!(txn = %txid, %sequence, %lsn, records = records.len(), "commit logged");

        // The commit is durable at this point; a failed switch only affects
        // later appends, which will report it themselves.
        if let Err(err) = log.rotate_if_full() {
            tracing::warn!(error = %err, "could not switch to a new log file");
        }
        Ok(())
    }

    /// Takes a checkpoint if `options` call for one.
    ///
    /// Commits are held off while the store contents are captured, the
    /// checkpoint record is appended and the log switches to a new file. The
    /// image is written after commits resume.
    pub(crate) fn checkpoint(
        &self,
        env: &EnvShared,
        options: &CheckpointOptions,
    ) -> CoreResult<Option<CheckpointInfo>> {
        let mut state = self.checkpoints.lock();

        let (image, info) = {
            let mut log = self.log.lock();
            let since_last = state.last_at.map(|at| at.elapsed());
            if !options.should_run(log.bytes_since_checkpoint(), since_last) {
                tracing::debug!(
                    logged = log.bytes_since_checkpoint(),
                    "checkpoint thresholds not met"
                );
                return Ok(None);
            }

            let sequence = self.committed_sequence();
            let stores = env.stores.snapshot();
            let lsn = log.append_all(&[LogRecord::Checkpoint { sequence }])?;
            let start_file = log.rotate()?;
            log.mark_checkpoint();

            let image = CheckpointImage {
                sequence,
                start_file,
                last_txid: self.next_txid.load(Ordering::SeqCst).saturating_sub(1),
                stores,
            };
            (
                image,
                CheckpointInfo {
                    sequence,
                    lsn,
                    start_file,
                },
            )
        };

        env.home.save_checkpoint(&image)?;
        state.start_file = info.start_file;
        state.last_at = Some(Instant::now());
        drop(state);

        env.stats.record_checkpoint();
        tracing::info!(
            sequence = %info.sequence,
            lsn = %info.lsn,
            start_file = info.start_file,
            "checkpoint complete"
        );
        Ok(Some(info))
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txid", &self.next_txid.load(Ordering::Relaxed))
            .field("committed_seq", &self.committed_seq.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
