//! Uniqueness provider abstraction.
//!
//! The uniqueness provider enforces at-most-once consumption of each
//! [`StateRef`]: the double-spend-prevention core of the notary. Two
//! implementations exist behind the same trait, chosen at configuration
//! time:
//! - [`persistent::PersistentUniquenessProvider`] - single-node durable
//!   commit log
//! - [`crate::raft::provider::ReplicatedUniquenessProvider`] - cluster-wide
//!   commit log replicated via Raft
//!
//! # Contract
//!
//! - Atomic across the whole ref set: either every ref in the batch is
//!   newly committed to the same transaction, or none are.
//! - Idempotent: resubmitting an already-committed batch with the identical
//!   transaction id is a no-op success, not a conflict.
//! - Safe under unbounded concurrent callers contending overlapping ref
//!   sets: exactly one caller wins, every other caller referencing any
//!   overlapping ref sees a conflict naming the winner.

pub mod persistent;

use crate::core::error::NotaryResult;
use crate::ledger::{Party, StateRef, TxId};
use async_trait::async_trait;

/// Component enforcing at-most-once consumption of state references.
#[async_trait]
pub trait UniquenessProvider: Send + Sync {
    /// Atomically commit `state_refs` as consumed by `tx_id`.
    ///
    /// Fails with [`crate::core::error::NotaryError::Conflict`] when any
    /// ref is already held by a different transaction; the report names
    /// every losing ref and its winner.
    async fn commit(
        &self,
        state_refs: &[StateRef],
        tx_id: TxId,
        caller: &Party,
    ) -> NotaryResult<()>;

    /// Query-only check: which of the given refs are already committed, and
    /// to which transactions.
    ///
    /// Served only where the answer is authoritative (on the replicated
    /// provider, the leader).
    async fn query(&self, state_refs: &[StateRef]) -> NotaryResult<Vec<(StateRef, TxId)>>;
}
