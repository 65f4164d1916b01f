//! Lightweight operational counters.
//!
//! Plain atomics bumped on the hot paths and sampled by the status
//! surfaces. Counters are monotonic; rates are the reader's business.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the uniqueness provider commit path.
#[derive(Debug, Default)]
pub struct CommitStats {
    committed_batches: AtomicU64,
    committed_refs: AtomicU64,
    idempotent_hits: AtomicU64,
    conflicts: AtomicU64,
}

impl CommitStats {
    /// All-zero counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh batch of `refs` state refs committed.
    pub fn record_committed(&self, refs: usize) {
        self.committed_batches.fetch_add(1, Ordering::Relaxed);
        self.committed_refs.fetch_add(refs as u64, Ordering::Relaxed);
    }

    /// An identical resubmission answered without writing.
    pub fn record_idempotent(&self) {
        self.idempotent_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch rejected with a conflict report.
    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot.
    pub fn snapshot(&self) -> CommitStatsSnapshot {
        CommitStatsSnapshot {
            committed_batches: self.committed_batches.load(Ordering::Relaxed),
            committed_refs: self.committed_refs.load(Ordering::Relaxed),
            idempotent_hits: self.idempotent_hits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`CommitStats`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommitStatsSnapshot {
    pub committed_batches: u64,
    pub committed_refs: u64,
    pub idempotent_hits: u64,
    pub conflicts: u64,
}

/// Counters for the notarization request path.
#[derive(Debug, Default)]
pub struct NotaryStats {
    requests: AtomicU64,
    notarized: AtomicU64,
    rejected_terminal: AtomicU64,
    failed_retryable: AtomicU64,
}

impl NotaryStats {
    /// All-zero counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request entered the pipeline.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A signed attestation was returned.
    pub fn record_notarized(&self) {
        self.notarized.fetch_add(1, Ordering::Relaxed);
    }

    /// A definitive rejection (malformed, invalid, window, conflict).
    pub fn record_rejected(&self) {
        self.rejected_terminal.fetch_add(1, Ordering::Relaxed);
    }

    /// A retryable failure (not leader, timeout, no majority).
    pub fn record_retryable(&self) {
        self.failed_retryable.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot.
    pub fn snapshot(&self) -> NotaryStatsSnapshot {
        NotaryStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            notarized: self.notarized.load(Ordering::Relaxed),
            rejected_terminal: self.rejected_terminal.load(Ordering::Relaxed),
            failed_retryable: self.failed_retryable.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`NotaryStats`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NotaryStatsSnapshot {
    pub requests: u64,
    pub notarized: u64,
    pub rejected_terminal: u64,
    pub failed_retryable: u64,
}

/// Counters for the consensus driver.
#[derive(Debug, Default)]
pub struct RaftStats {
    elections_won: AtomicU64,
    step_downs: AtomicU64,
    entries_applied: AtomicU64,
    apply_conflicts: AtomicU64,
    proposals: AtomicU64,
    proposals_superseded: AtomicU64,
}

impl RaftStats {
    /// All-zero counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// This node won an election.
    pub fn record_election_won(&self) {
        self.elections_won.fetch_add(1, Ordering::Relaxed);
    }

    /// This node lost leadership.
    pub fn record_step_down(&self) {
        self.step_downs.fetch_add(1, Ordering::Relaxed);
    }

    /// A committed entry was applied.
    pub fn record_applied(&self) {
        self.entries_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// An applied entry produced a conflict outcome.
    pub fn record_apply_conflict(&self) {
        self.apply_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// A client proposal was accepted into the log.
    pub fn record_proposal(&self) {
        self.proposals.fetch_add(1, Ordering::Relaxed);
    }

    /// A pending proposal was abandoned after a term or leadership change.
    pub fn record_superseded(&self) {
        self.proposals_superseded.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot.
    pub fn snapshot(&self) -> RaftStatsSnapshot {
        RaftStatsSnapshot {
            elections_won: self.elections_won.load(Ordering::Relaxed),
            step_downs: self.step_downs.load(Ordering::Relaxed),
            entries_applied: self.entries_applied.load(Ordering::Relaxed),
            apply_conflicts: self.apply_conflicts.load(Ordering::Relaxed),
            proposals: self.proposals.load(Ordering::Relaxed),
            proposals_superseded: self.proposals_superseded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`RaftStats`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RaftStatsSnapshot {
    pub elections_won: u64,
    pub step_downs: u64,
    pub entries_applied: u64,
    pub apply_conflicts: u64,
    pub proposals: u64,
    pub proposals_superseded: u64,
}
