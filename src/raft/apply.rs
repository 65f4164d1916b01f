//! Application of committed entries to the commit map.
//!
//! Every node applies committed entries in strict index order, so the
//! commit map is a pure function of the applied log prefix and is identical
//! on every node at the same applied index. Conflict detection here is
//! authoritative: a leader may pre-screen proposals against its own applied
//! state, but only the apply step decides.

use crate::core::error::{NotaryError, NotaryResult};
use crate::ledger::{ConflictReport, StateRef, TxId};
use crate::raft::log::LogEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of applying one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// Every ref in the batch was fresh; all are now committed.
    Committed,

    /// Every ref was already held by the same transaction; no-op.
    Idempotent,

    /// At least one ref is held by a different transaction; nothing was
    /// written. The report names every losing ref.
    Conflict(ConflictReport),

    /// Barrier entry with no batch.
    Barrier,
}

/// The result of applying the entry at a given position.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Log index of the applied entry.
    pub index: u64,

    /// Term of the applied entry.
    pub term: u64,

    /// What the entry did to the commit map.
    pub result: ApplyResult,
}

/// The replicated spent-ref map.
#[derive(Debug, Default)]
pub struct CommitMap {
    map: BTreeMap<Vec<u8>, TxId>,
    last_applied: u64,
}

impl CommitMap {
    /// Empty map at applied index 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the last applied entry.
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Number of committed refs.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no refs have been committed.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The transaction holding `state_ref`, if committed.
    pub fn holder_of(&self, state_ref: &StateRef) -> Option<TxId> {
        self.map.get(&state_ref.to_key()).copied()
    }

    /// Check a batch against the applied state without writing. Returns the
    /// conflict report that applying it now would produce, if any.
    pub fn screen(&self, state_refs: &[StateRef], tx_id: TxId) -> Option<ConflictReport> {
        let mut report = ConflictReport::new();
        for state_ref in state_refs {
            if let Some(winner) = self.holder_of(state_ref) {
                if winner != tx_id {
                    report.push(*state_ref, winner);
                }
            }
        }
        if report.is_empty() {
            None
        } else {
            Some(report)
        }
    }

    /// Apply `entry`, which must be the next entry in order.
    ///
    /// The whole batch is atomic: if any ref loses to a different holder,
    /// no ref from the batch is written.
    pub fn apply(&mut self, entry: &LogEntry) -> ApplyOutcome {
        debug_assert_eq!(
            entry.index,
            self.last_applied + 1,
            "entries must be applied in strict order"
        );
        self.last_applied = entry.index;

        let Some(batch) = &entry.batch else {
            return ApplyOutcome {
                index: entry.index,
                term: entry.term,
                result: ApplyResult::Barrier,
            };
        };

        if let Some(report) = self.screen(&batch.state_refs, batch.tx_id) {
            return ApplyOutcome {
                index: entry.index,
                term: entry.term,
                result: ApplyResult::Conflict(report),
            };
        }

        let fresh = batch
            .state_refs
            .iter()
            .filter(|r| self.holder_of(r).is_none())
            .count();
        let result = if fresh == 0 {
            ApplyResult::Idempotent
        } else {
            for state_ref in &batch.state_refs {
                self.map.insert(state_ref.to_key(), batch.tx_id);
            }
            ApplyResult::Committed
        };

        ApplyOutcome {
            index: entry.index,
            term: entry.term,
            result,
        }
    }

    /// Serializable image of the map, for future log compaction.
    pub fn snapshot(&self) -> CommitMapSnapshot {
        CommitMapSnapshot {
            last_applied: self.last_applied,
            records: self
                .map
                .iter()
                .filter_map(|(key, tx)| StateRef::from_key(key).map(|r| (r, *tx)))
                .collect(),
        }
    }

    /// Rebuild a map from a snapshot.
    pub fn restore(snapshot: &CommitMapSnapshot) -> Self {
        Self {
            map: snapshot
                .records
                .iter()
                .map(|(r, tx)| (r.to_key(), *tx))
                .collect(),
            last_applied: snapshot.last_applied,
        }
    }
}

/// Point-in-time image of a [`CommitMap`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMapSnapshot {
    /// Applied index the image corresponds to.
    pub last_applied: u64,

    /// Every committed ref and its holder.
    pub records: Vec<(StateRef, TxId)>,
}

impl CommitMapSnapshot {
    /// Compact binary encoding.
    pub fn to_bytes(&self) -> NotaryResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| NotaryError::internal(format!("encode snapshot: {e}")))
    }

    /// Decode a binary snapshot.
    pub fn from_bytes(bytes: &[u8]) -> NotaryResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| NotaryError::internal(format!("decode snapshot: {e}")))
    }
}
