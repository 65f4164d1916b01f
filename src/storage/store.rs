//! Durable commit store.
//!
//! The store is an append-only log of committed batches plus an in-memory
//! index `StateRef -> TxId` rebuilt from the log on open. All state derives
//! from log records: a batch is durable once its record is written and
//! fsynced, and the index is a pure function of the log. Records are never
//! mutated or deleted.
//!
//! Atomicity: a batch is written as a single record, so a crash either
//! persists the whole batch or none of it. Replay tolerates a torn final
//! line by discarding it.

use crate::core::error::{NotaryError, NotaryResult};
use crate::ledger::{ConflictReport, StateRef, TxId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the commit log file inside the data directory.
pub const COMMIT_LOG_FILE: &str = "commits.log";

/// One durable record: a whole batch committed to a single transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    /// The consuming transaction.
    pub tx_id: TxId,

    /// Every ref consumed by the batch.
    pub state_refs: Vec<StateRef>,

    /// Name of the requesting party, kept for audit.
    pub requested_by: String,
}

/// Outcome of a store-level commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommit {
    /// The batch was newly written.
    Committed,

    /// Every ref was already held by the same transaction; nothing written.
    AlreadyCommitted,
}

struct StoreInner {
    index: BTreeMap<Vec<u8>, TxId>,
    log: File,
}

/// Append-only commit store with an in-memory index.
///
/// Writers take the store lock for the duration of a commit attempt, which
/// serializes overlapping callers; the conflict check and the append are a
/// single critical section (equivalent to per-ref exclusive locking).
pub struct CommitStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl CommitStore {
    /// Open (or create) the store in the given data directory, replaying the
    /// commit log to rebuild the index.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> NotaryResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(COMMIT_LOG_FILE);

        let mut index = BTreeMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                // A torn final line from a crash mid-write is not a commit.
                let Ok(record) = serde_json::from_str::<CommitRecord>(&line) else {
                    tracing::warn!(path = %path.display(), "discarding torn commit log tail");
                    break;
                };
                for state_ref in &record.state_refs {
                    index.insert(state_ref.to_key(), record.tx_id);
                }
            }
        }

        let log = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(
            path = %path.display(),
            refs = index.len(),
            "commit store opened"
        );

        Ok(Self {
            path,
            inner: Mutex::new(StoreInner { index, log }),
        })
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of committed refs.
    pub fn committed_ref_count(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Look up the transaction holding a ref, if any.
    pub fn holder_of(&self, state_ref: &StateRef) -> Option<TxId> {
        self.inner.lock().index.get(&state_ref.to_key()).copied()
    }

    /// Atomically commit a batch of refs to a transaction.
    ///
    /// If any ref is held by a different transaction, nothing is written and
    /// the full conflict report is returned - every losing ref, including
    /// ones that would otherwise have succeeded. If every ref is already
    /// held by the same transaction, the call is an idempotent no-op.
    pub fn commit_batch(
        &self,
        state_refs: &[StateRef],
        tx_id: TxId,
        requested_by: &str,
    ) -> NotaryResult<StoreCommit> {
        let mut inner = self.inner.lock();

        let mut report = ConflictReport::new();
        let mut fresh = 0usize;
        for state_ref in state_refs {
            match inner.index.get(&state_ref.to_key()) {
                Some(holder) if *holder != tx_id => report.push(*state_ref, *holder),
                Some(_) => {}
                None => fresh += 1,
            }
        }
        if !report.is_empty() {
            return Err(NotaryError::Conflict(report));
        }
        if fresh == 0 {
            return Ok(StoreCommit::AlreadyCommitted);
        }

        let record = CommitRecord {
            tx_id,
            state_refs: state_refs.to_vec(),
            requested_by: requested_by.to_string(),
        };
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| NotaryError::internal(format!("commit record encode: {e}")))?;
        line.push(b'\n');
        inner.log.write_all(&line)?;
        inner.log.sync_data()?;

        for state_ref in state_refs {
            inner.index.insert(state_ref.to_key(), tx_id);
        }

        Ok(StoreCommit::Committed)
    }
}
