//! Replicated uniqueness provider: a Raft-style consensus core.
//!
//! The replicated provider keeps the commit map consistent across a fixed
//! cluster membership. It is built from three independently testable units,
//! composed by a single driver loop:
//! - [`log`] - durable, append-only entry log with persisted hard state
//! - [`node`] - the deterministic election/replication state machine
//! - [`apply`] - strict-order application of committed entries to the
//!   commit map, where conflict detection is authoritative
//!
//! [`provider`] wraps the driver behind the
//! [`crate::uniqueness::UniquenessProvider`] trait; [`rpc`] defines the
//! inter-node message types.
//!
//! # Key invariants
//!
//! - **APPLY-ORDER**: entries are applied in strict index order; every
//!   node's applied prefix up to a common commit index is identical.
//! - **LEADER-WRITE**: only the current leader accepts client commits;
//!   followers answer `NotLeader` with a leader hint.
//! - **MAJORITY-ACK**: an entry is committed only once a majority
//!   (including the leader) has durably stored it.
//! - **NO-FALSE-CONFLICT**: an uncertain outcome (lost leadership, no
//!   majority) is reported as retryable, never as a conflict.

pub mod apply;
pub mod log;
pub mod node;
pub mod provider;
pub mod rpc;
pub mod state;
