//! Notarius - distributed notarization service.
//!
//! Notarius prevents double spends: a transaction consumes input state
//! references, and the notary guarantees each reference is consumed at most
//! once, cluster-wide. Clients submit a notarization request; if every
//! input ref is fresh (or this exact transaction already won them), the
//! notary commits the batch and returns a signed attestation over the
//! transaction id. If any ref is already held by a different transaction,
//! the client gets a conflict report naming the winners.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Client Listener                           │
//! │            framed notarization requests over TCP                │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Dispatcher + Protocol Flows                   │
//! │   validating / non-validating │ time-window check │ signing     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Uniqueness Provider                         │
//! │        persistent (single node) │ replicated (Raft)             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Durable Commit Log                         │
//! │         append-only, fsynced, replayed on recovery              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Component lifecycle orchestration
//! - [`core::time`] - Clock abstraction and time-window checking
//! - [`core::error`] - Error taxonomy and outcome classification
//!
//! ## Ledger model
//! - [`ledger`] - Transaction ids, state refs, parties, conflict reports
//!
//! ## Uniqueness
//! - [`uniqueness`] - The provider trait
//! - [`uniqueness::persistent`] - Single-node durable provider
//! - [`storage::store`] - The append-only commit store
//!
//! ## Replication
//! - [`raft::node`] - Deterministic election/replication state machine
//! - [`raft::log`] - Durable replicated log
//! - [`raft::apply`] - Commit map and authoritative conflict detection
//! - [`raft::provider`] - Replicated provider and driver task
//!
//! ## Protocol
//! - [`protocol`] - Notarization state machine and variants
//! - [`protocol::flow`] - Per-request flows
//! - [`protocol::dispatcher`] - Stateless request router
//! - [`protocol::messages`] - Wire types and the attestation signer
//!
//! ## Plumbing
//! - [`net`] - Framing, peer transport, client listener
//! - [`ops::telemetry`] - Operational counters
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod core;
pub mod ledger;
pub mod net;
pub mod ops;
pub mod protocol;
pub mod raft;
pub mod storage;
pub mod uniqueness;

pub use crate::core::error::{NotaryError, NotaryResult};
pub use crate::ledger::{ConflictReport, Party, StateRef, TxId};
