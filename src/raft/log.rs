//! Durable replicated log.
//!
//! One JSON record per line, appended and fsynced before the write is
//! acknowledged to the protocol. The file carries three record kinds:
//! entries, hard-state updates (term / vote), and truncation markers. On
//! open the whole file is replayed in order to rebuild the in-memory log,
//! so a restarted node resumes with exactly the entries it had durably
//! stored. A torn trailing line from a crash mid-append is tolerated and
//! dropped.
//!
//! Entry indices are 1-based; index 0 is the empty-log sentinel with
//! term 0.

use crate::core::error::{NotaryError, NotaryResult};
use crate::ledger::StateRef;
use crate::ledger::TxId;
use crate::raft::state::{HardState, NodeId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// File name of the replicated log inside the data directory.
pub const RAFT_LOG_FILE: &str = "raft.log";

/// One replicated log entry: a batch of state refs consumed by a
/// transaction, stamped with the term it was proposed in.
///
/// A leader appends an entry with an empty batch when it takes office, so
/// that entries from earlier terms become committable under the
/// current-term commit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, 1-based.
    pub index: u64,

    /// Term of the leader that created the entry.
    pub term: u64,

    /// Consumed refs and the consuming transaction. Empty for the
    /// leader-change barrier entry.
    pub batch: Option<EntryBatch>,
}

/// The payload of a client-proposed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBatch {
    /// Transaction consuming the refs.
    pub tx_id: TxId,

    /// The full input ref set of the transaction.
    pub state_refs: Vec<StateRef>,

    /// Name of the requesting party, kept for audit.
    pub requested_by: String,
}

/// On-disk record framing.
#[derive(Debug, Serialize, Deserialize)]
enum LogRecord {
    Entry(LogEntry),
    HardState { term: u64, voted_for: Option<NodeId> },
    Truncate { from_index: u64 },
    Commit { index: u64 },
}

/// The durable log plus its in-memory mirror.
pub struct RaftLog {
    path: PathBuf,
    file: File,
    entries: Vec<LogEntry>,
    hard_state: HardState,
    commit_index: u64,
}

impl RaftLog {
    /// Open (or create) the log in `data_dir`, replaying any existing
    /// records.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> NotaryResult<Self> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(RAFT_LOG_FILE);

        let mut entries: Vec<LogEntry> = Vec::new();
        let mut hard_state = HardState::default();
        let mut commit_index = 0u64;
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let record: LogRecord = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(err) => {
                        // A torn tail from a crash mid-append is expected;
                        // anything before the tail is not.
                        tracing::warn!(line = lineno + 1, %err, "dropping unreadable log tail");
                        break;
                    }
                };
                match record {
                    LogRecord::Entry(entry) => {
                        if entry.index != entries.len() as u64 + 1 {
                            return Err(NotaryError::storage(format!(
                                "log entry out of sequence at line {}: got index {}, expected {}",
                                lineno + 1,
                                entry.index,
                                entries.len() + 1
                            )));
                        }
                        entries.push(entry);
                    }
                    LogRecord::HardState { term, voted_for } => {
                        hard_state = HardState { term, voted_for };
                    }
                    LogRecord::Truncate { from_index } => {
                        entries.truncate(from_index.saturating_sub(1) as usize);
                    }
                    LogRecord::Commit { index } => {
                        commit_index = commit_index.max(index);
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            term = hard_state.term,
            "replicated log opened"
        );
        // A Truncate record after the last Commit would mean committed
        // entries were dropped, which replication never does; clamp anyway.
        commit_index = commit_index.min(entries.len() as u64);
        Ok(Self {
            path,
            file,
            entries,
            hard_state,
            commit_index,
        })
    }

    fn write_record(&mut self, record: &LogRecord) -> NotaryResult<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| NotaryError::storage(format!("encode log record: {e}")))?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Current hard state.
    pub fn hard_state(&self) -> HardState {
        self.hard_state
    }

    /// Persist a new term and vote. Durable before returning.
    pub fn save_hard_state(&mut self, term: u64, voted_for: Option<NodeId>) -> NotaryResult<()> {
        self.write_record(&LogRecord::HardState { term, voted_for })?;
        self.hard_state = HardState { term, voted_for };
        Ok(())
    }

    /// Highest index known committed at the last save, restored on open.
    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    /// Persist the commit index so recovery can re-apply committed entries
    /// without waiting for a new leader.
    pub fn save_commit_index(&mut self, index: u64) -> NotaryResult<()> {
        if index <= self.commit_index {
            return Ok(());
        }
        self.write_record(&LogRecord::Commit { index })?;
        self.commit_index = index;
        Ok(())
    }

    /// Index of the last entry, 0 when empty.
    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Term of the last entry, 0 when empty.
    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    /// Term of the entry at `index`; `Some(0)` for index 0, `None` past the
    /// end.
    pub fn term_of(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.entries.get(index as usize - 1).map(|e| e.term)
    }

    /// The entry at `index`, if present.
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1)
    }

    /// Entries from `from` (inclusive), at most `max`.
    pub fn entries_from(&self, from: u64, max: usize) -> Vec<LogEntry> {
        if from == 0 || from > self.last_index() {
            return Vec::new();
        }
        self.entries[from as usize - 1..]
            .iter()
            .take(max)
            .cloned()
            .collect()
    }

    /// Append `entry`, which must continue the log. Durable before
    /// returning.
    pub fn append(&mut self, entry: LogEntry) -> NotaryResult<()> {
        if entry.index != self.last_index() + 1 {
            return Err(NotaryError::storage(format!(
                "append out of sequence: got index {}, expected {}",
                entry.index,
                self.last_index() + 1
            )));
        }
        self.write_record(&LogRecord::Entry(entry.clone()))?;
        self.entries.push(entry);
        Ok(())
    }

    /// Drop every entry at `from_index` and beyond. Durable before
    /// returning. Used when a follower's log diverges from the leader's.
    pub fn truncate_from(&mut self, from_index: u64) -> NotaryResult<()> {
        if from_index > self.last_index() {
            return Ok(());
        }
        self.write_record(&LogRecord::Truncate { from_index })?;
        self.entries.truncate(from_index.saturating_sub(1) as usize);
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RaftLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftLog")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("hard_state", &self.hard_state)
            .finish()
    }
}
