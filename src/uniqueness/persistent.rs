//! Single-node durable uniqueness provider.
//!
//! Wraps the [`CommitStore`]: each commit executes as one local atomic
//! store transaction. Callers touching disjoint ref sets proceed
//! independently; overlapping callers are serialized by the store's write
//! lock for the duration of the attempt.

use crate::core::error::{NotaryError, NotaryResult};
use crate::ledger::{Party, StateRef, TxId};
use crate::ops::telemetry::CommitStats;
use crate::storage::store::{CommitStore, StoreCommit};
use crate::uniqueness::UniquenessProvider;
use async_trait::async_trait;
use std::sync::Arc;

/// Uniqueness provider backed by a single-node durable commit log.
pub struct PersistentUniquenessProvider {
    store: Arc<CommitStore>,
    stats: CommitStats,
}

impl PersistentUniquenessProvider {
    /// Create a provider over an open commit store.
    pub fn new(store: Arc<CommitStore>) -> Self {
        Self {
            store,
            stats: CommitStats::new(),
        }
    }

    /// Open the store in `data_dir` and build a provider over it.
    pub fn open<P: AsRef<std::path::Path>>(data_dir: P) -> NotaryResult<Self> {
        Ok(Self::new(Arc::new(CommitStore::open(data_dir)?)))
    }

    /// Commit statistics.
    pub fn stats(&self) -> &CommitStats {
        &self.stats
    }
}

#[async_trait]
impl UniquenessProvider for PersistentUniquenessProvider {
    async fn commit(
        &self,
        state_refs: &[StateRef],
        tx_id: TxId,
        caller: &Party,
    ) -> NotaryResult<()> {
        if state_refs.is_empty() {
            return Err(NotaryError::malformed("empty input state ref set"));
        }

        match self.store.commit_batch(state_refs, tx_id, &caller.name) {
            Ok(StoreCommit::Committed) => {
                self.stats.record_committed(state_refs.len());
                tracing::debug!(tx = %tx_id, refs = state_refs.len(), caller = %caller, "batch committed");
                Ok(())
            }
            Ok(StoreCommit::AlreadyCommitted) => {
                self.stats.record_idempotent();
                tracing::debug!(tx = %tx_id, caller = %caller, "idempotent resubmission");
                Ok(())
            }
            Err(err) => {
                if let NotaryError::Conflict(report) = &err {
                    self.stats.record_conflict();
                    tracing::info!(tx = %tx_id, caller = %caller, conflicts = report.len(), "commit rejected");
                }
                Err(err)
            }
        }
    }

    async fn query(&self, state_refs: &[StateRef]) -> NotaryResult<Vec<(StateRef, TxId)>> {
        Ok(state_refs
            .iter()
            .filter_map(|r| self.store.holder_of(r).map(|tx| (*r, tx)))
            .collect())
    }
}
