//! The per-request notarization protocol.
//!
//! Each inbound request runs one instance of a small state machine:
//!
//! ```text
//! AwaitingRequest -> (Validating) -> CheckingTimeWindow -> Committing
//!     -> Signing -> Responding -> Done
//! ```
//!
//! `Validating` only exists in the validating variant; `Failed` is
//! reachable from every non-terminal state. Transitions are legality
//! checked so a coding error in a flow cannot skip the commit or sign a
//! rejected transaction.

pub mod dispatcher;
pub mod flow;
pub mod messages;

use serde::{Deserialize, Serialize};

/// Which notarization flow this notary runs, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotaryVariant {
    /// Commit-only: the notary checks uniqueness and the time window.
    NonValidating,
    /// The notary additionally verifies the full transaction before
    /// attempting consensus.
    Validating,
}

impl std::fmt::Display for NotaryVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonValidating => write!(f, "non-validating"),
            Self::Validating => write!(f, "validating"),
        }
    }
}

/// Position of a request in the notarization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Nothing checked yet.
    AwaitingRequest,
    /// Contract verification in progress (validating variant only).
    Validating,
    /// Time-window check in progress.
    CheckingTimeWindow,
    /// Uniqueness commit in progress.
    Committing,
    /// Commit succeeded; producing the attestation.
    Signing,
    /// Attestation produced; handing the response back.
    Responding,
    /// Terminal success.
    Done,
    /// Terminal failure.
    Failed,
}

impl ProtocolState {
    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition under `variant`.
    pub fn may_advance_to(&self, next: ProtocolState, variant: NotaryVariant) -> bool {
        use ProtocolState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        match (self, next) {
            (AwaitingRequest, Validating) => variant == NotaryVariant::Validating,
            (AwaitingRequest, CheckingTimeWindow) => variant == NotaryVariant::NonValidating,
            (Validating, CheckingTimeWindow) => true,
            (CheckingTimeWindow, Committing) => true,
            (Committing, Signing) => true,
            (Signing, Responding) => true,
            (Responding, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingRequest => "awaiting_request",
            Self::Validating => "validating",
            Self::CheckingTimeWindow => "checking_time_window",
            Self::Committing => "committing",
            Self::Signing => "signing",
            Self::Responding => "responding",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}
