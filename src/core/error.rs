//! Error types and outcome classification.
//!
//! The notary distinguishes two classes of failure:
//! - **Terminal** outcomes are definitive for the submitted transaction id
//!   and must be reported to the client verbatim: a malformed request, a
//!   failed contract check, a time-window violation, or a double-spend
//!   conflict.
//! - **Retryable** outcomes assert nothing about the disputed refs: the node
//!   is not the leader, a step timed out, or no majority was reachable. The
//!   client retries, possibly against another cluster member.
//!
//! A conflict is only ever reported when no prior commit could be undone;
//! uncertain outcomes surface as [`NotaryError::ConsensusUnavailable`],
//! never as a false conflict.

use crate::ledger::ConflictReport;
use crate::raft::state::NodeId;
use thiserror::Error;

/// Result alias used throughout the notary.
pub type NotaryResult<T> = Result<T, NotaryError>;

/// Notary error taxonomy.
#[derive(Debug, Clone, Error)]
pub enum NotaryError {
    /// The request is missing fields or internally inconsistent.
    #[error("malformed request: {reason}")]
    RequestMalformed { reason: String },

    /// Validating variant only: the contract-verification collaborator
    /// rejected the transaction. Consensus is never attempted.
    #[error("transaction invalid: {reason}")]
    TransactionInvalid { reason: String },

    /// The requested validity interval does not contain the current time,
    /// even after applying the configured tolerance.
    #[error("time window out of bounds: now {now_ms}ms is outside [{from}, {until}]")]
    TimeWindowOutOfBounds {
        /// Wall-clock time at the check, ms since the Unix epoch.
        now_ms: u64,
        /// Lower bound as ms since epoch, or "-inf".
        from: String,
        /// Upper bound as ms since epoch, or "+inf".
        until: String,
    },

    /// Double-spend: one or more input refs are already committed to a
    /// different transaction. Carries every losing ref and its winner.
    #[error("input state conflict: {0}")]
    Conflict(ConflictReport),

    /// Replicated provider only: this node is not the leader. The hint, if
    /// present, is the last-known leader to retry against.
    #[error("not the leader{}", .hint.map(|h| format!(" (leader hint: {h})")).unwrap_or_default())]
    NotLeader { hint: Option<NodeId> },

    /// An internal step or counterparty exceeded its deadline.
    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    /// No majority reachable or the leadership changed mid-proposal.
    /// Not a definitive outcome for the submitted transaction.
    #[error("consensus unavailable: {reason}")]
    ConsensusUnavailable { reason: String },

    /// Socket-level failure on a client or peer connection.
    #[error("network error: {message}")]
    Network { message: String },

    /// Durable storage failure.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Invariant violation or unexpected internal condition.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl NotaryError {
    /// Whether this error is a definitive, non-retryable outcome for the
    /// submitted transaction id.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RequestMalformed { .. }
                | Self::TransactionInvalid { .. }
                | Self::TimeWindowOutOfBounds { .. }
                | Self::Conflict(_)
        )
    }

    /// Whether the caller should retry, possibly against a different node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotLeader { .. } | Self::Timeout { .. } | Self::ConsensusUnavailable { .. }
        )
    }

    /// Convenience constructor for malformed requests.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::RequestMalformed {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for network failures.
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }

    /// Convenience constructor for storage failures.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }

    /// Convenience constructor for internal failures.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for NotaryError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err)
    }
}
