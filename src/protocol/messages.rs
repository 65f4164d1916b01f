//! Wire types and the attestation signer.

use crate::core::error::NotaryError;
use crate::core::time::TimeWindow;
use crate::ledger::{ConflictReport, Party, StateRef, TxId};
use crate::ops::telemetry::{CommitStatsSnapshot, NotaryStatsSnapshot};
use crate::raft::provider::RaftStatus;
use crate::raft::state::NodeId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};

/// Domain separator prefixed to attestation signing bytes.
const ATTESTATION_DOMAIN: &[u8] = b"notarius/attestation/v1";

/// Opaque transaction payload carried by validating-flow requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPayload {
    /// Serialized transaction bytes; the notary only hashes them.
    #[serde(with = "hex")]
    pub bytes: Vec<u8>,
}

impl TransactionPayload {
    /// The id the payload hashes to.
    pub fn derived_id(&self) -> TxId {
        TxId::digest(&self.bytes)
    }
}

/// A request to notarize one transaction.
///
/// The non-validating shape carries only the id, input refs, and optional
/// time window; the validating shape additionally carries the full
/// transaction payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotarizationRequest {
    /// Id of the transaction to notarize.
    pub tx_id: TxId,

    /// The state refs the transaction consumes.
    pub input_state_refs: Vec<StateRef>,

    /// Requested validity interval, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,

    /// The requesting party.
    pub requesting_party: Party,

    /// Full transaction payload; required by the validating variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionPayload>,
}

/// Classification of a failed notarization, mirrored from the error
/// taxonomy for clients that only switch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    RequestMalformed,
    TransactionInvalid,
    TimeWindowOutOfBounds,
    Conflict,
    NotLeader,
    Timeout,
    ConsensusUnavailable,
    Internal,
}

impl FailureKind {
    /// Whether a client should retry, possibly against another node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotLeader | Self::Timeout | Self::ConsensusUnavailable
        )
    }
}

/// Structured failure payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FailureDetail {
    /// Every losing ref and its winning transaction.
    Conflicts(ConflictReport),

    /// Last-known leader to retry against, if known.
    LeaderHint(Option<NodeId>),

    /// Human-readable reason.
    Reason(String),
}

/// Reply to a [`NotarizationRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotarizationResponse {
    /// The transaction was notarized; the signature is the proof.
    Success { signature: Attestation },

    /// The transaction was not notarized.
    Failure {
        kind: FailureKind,
        detail: FailureDetail,
    },
}

impl NotarizationResponse {
    /// Map an error to its wire form.
    pub fn from_error(err: &NotaryError) -> Self {
        let (kind, detail) = match err {
            NotaryError::RequestMalformed { reason } => (
                FailureKind::RequestMalformed,
                FailureDetail::Reason(reason.clone()),
            ),
            NotaryError::TransactionInvalid { reason } => (
                FailureKind::TransactionInvalid,
                FailureDetail::Reason(reason.clone()),
            ),
            NotaryError::TimeWindowOutOfBounds { .. } => (
                FailureKind::TimeWindowOutOfBounds,
                FailureDetail::Reason(err.to_string()),
            ),
            NotaryError::Conflict(report) => {
                (FailureKind::Conflict, FailureDetail::Conflicts(report.clone()))
            }
            NotaryError::NotLeader { hint } => {
                (FailureKind::NotLeader, FailureDetail::LeaderHint(*hint))
            }
            NotaryError::Timeout { .. } => {
                (FailureKind::Timeout, FailureDetail::Reason(err.to_string()))
            }
            NotaryError::ConsensusUnavailable { reason } => (
                FailureKind::ConsensusUnavailable,
                FailureDetail::Reason(reason.clone()),
            ),
            NotaryError::Network { .. } | NotaryError::Storage { .. } | NotaryError::Internal { .. } => (
                FailureKind::Internal,
                FailureDetail::Reason("internal error".into()),
            ),
        };
        Self::Failure { kind, detail }
    }
}

/// A notary's signature over a transaction id: the proof of notarization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// The signing notary's identity.
    pub notary: Party,

    /// The notarized transaction.
    pub tx_id: TxId,

    /// Ed25519 signature over the domain-separated tx id, hex-encoded.
    pub signature_hex: String,
}

impl Attestation {
    fn signing_bytes(tx_id: &TxId) -> Vec<u8> {
        let mut out = Vec::with_capacity(ATTESTATION_DOMAIN.len() + 32);
        out.extend_from_slice(ATTESTATION_DOMAIN);
        out.extend_from_slice(&tx_id.0);
        out
    }

    /// Verify the signature against the notary's embedded public key.
    pub fn verify(&self) -> bool {
        let Some(key) = self.notary.verifying_key() else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(&self.signature_hex) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        key.verify(&Self::signing_bytes(&self.tx_id), &signature)
            .is_ok()
    }
}

/// Holds the notary's signing key and produces attestations.
pub struct NotarySigner {
    name: String,
    key: SigningKey,
}

impl NotarySigner {
    /// Build a signer from a 32-byte hex-encoded seed.
    pub fn from_seed_hex(name: impl Into<String>, seed_hex: &str) -> Result<Self, NotaryError> {
        let seed = <[u8; 32]>::try_from(
            hex::decode(seed_hex)
                .map_err(|_| NotaryError::malformed("signing key seed is not valid hex"))?,
        )
        .map_err(|_| NotaryError::malformed("signing key seed must be 32 bytes"))?;
        Ok(Self {
            name: name.into(),
            key: SigningKey::from_bytes(&seed),
        })
    }

    /// Generate a fresh signer with a random key.
    pub fn generate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Hex form of the signing seed, for `keygen` output.
    pub fn seed_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    /// The notary's public identity.
    pub fn party(&self) -> Party {
        Party::new(self.name.clone(), &self.key.verifying_key())
    }

    /// Sign an attestation over `tx_id`.
    pub fn attest(&self, tx_id: TxId) -> Attestation {
        let signature = self.key.sign(&Attestation::signing_bytes(&tx_id));
        Attestation {
            notary: self.party(),
            tx_id,
            signature_hex: hex::encode(signature.to_bytes()),
        }
    }
}

/// Anything a client can send on the service port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Notarize a transaction.
    Notarize(Box<NotarizationRequest>),

    /// Report node status.
    Status,
}

/// Reply on the service port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientResponse {
    /// Outcome of a notarization request.
    Notarization(NotarizationResponse),

    /// Node status report.
    Status(NodeStatus),
}

/// Operational snapshot returned by the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Notary service name.
    pub notary: String,

    /// Flow variant.
    pub variant: String,

    /// Provider mode ("persistent" or "replicated").
    pub provider_mode: String,

    /// Consensus position; absent in persistent mode.
    pub consensus: Option<RaftStatus>,

    /// Request-path counters.
    pub requests: NotaryStatsSnapshot,

    /// Commit-path counters.
    pub commits: CommitStatsSnapshot,
}
