//! The notarization flows.
//!
//! One [`NotaryFlow`] instance serves one request, walking the protocol
//! state machine and failing closed: every transition is legality checked,
//! and any error lands the flow in `Failed` with the error as the outcome.

use crate::core::error::{NotaryError, NotaryResult};
use crate::core::time::TimeWindowChecker;
use crate::ledger::TxId;
use crate::protocol::messages::{Attestation, NotarizationRequest, TransactionPayload};
use crate::protocol::{NotaryVariant, ProtocolState};
use crate::uniqueness::UniquenessProvider;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::messages::NotarySigner;

/// Contract-verification collaborator for the validating variant.
///
/// The notary treats the transaction payload as opaque; what "valid" means
/// belongs to the deployment.
#[async_trait]
pub trait TransactionVerifier: Send + Sync {
    /// Verify the transaction. A rejection must be
    /// [`NotaryError::TransactionInvalid`]; any other error is mapped to it.
    async fn verify(&self, payload: &TransactionPayload) -> NotaryResult<()>;
}

/// Verifier that accepts everything. Used by tests and deployments that
/// delegate verification elsewhere.
pub struct AcceptAllVerifier;

#[async_trait]
impl TransactionVerifier for AcceptAllVerifier {
    async fn verify(&self, _payload: &TransactionPayload) -> NotaryResult<()> {
        Ok(())
    }
}

/// One request's walk through the protocol.
pub struct NotaryFlow {
    variant: NotaryVariant,
    checker: TimeWindowChecker,
    provider: Arc<dyn UniquenessProvider>,
    signer: Arc<NotarySigner>,
    verifier: Option<Arc<dyn TransactionVerifier>>,
    step_deadline: Duration,
    state: ProtocolState,
}

impl NotaryFlow {
    /// Assemble a flow. `verifier` must be present in the validating
    /// variant.
    pub fn new(
        variant: NotaryVariant,
        checker: TimeWindowChecker,
        provider: Arc<dyn UniquenessProvider>,
        signer: Arc<NotarySigner>,
        verifier: Option<Arc<dyn TransactionVerifier>>,
        step_deadline: Duration,
    ) -> Self {
        Self {
            variant,
            checker,
            provider,
            signer,
            verifier,
            step_deadline,
            state: ProtocolState::AwaitingRequest,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    fn advance(&mut self, next: ProtocolState) -> NotaryResult<()> {
        if !self.state.may_advance_to(next, self.variant) {
            return Err(NotaryError::internal(format!(
                "illegal protocol transition {} -> {next}",
                self.state
            )));
        }
        tracing::trace!(from = %self.state, to = %next, "protocol transition");
        self.state = next;
        Ok(())
    }

    async fn with_deadline<T, F>(&self, operation: &str, fut: F) -> NotaryResult<T>
    where
        F: Future<Output = NotaryResult<T>>,
    {
        match tokio::time::timeout(self.step_deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(NotaryError::Timeout {
                operation: operation.into(),
            }),
        }
    }

    /// Run the request to completion, producing the attestation or the
    /// definitive / retryable error.
    pub async fn run(&mut self, request: &NotarizationRequest) -> NotaryResult<Attestation> {
        let outcome = self.run_inner(request).await;
        if outcome.is_err() {
            self.state = ProtocolState::Failed;
        }
        outcome
    }

    async fn run_inner(&mut self, request: &NotarizationRequest) -> NotaryResult<Attestation> {
        self.screen_request(request)?;

        if self.variant == NotaryVariant::Validating {
            self.advance(ProtocolState::Validating)?;
            let payload = request
                .transaction
                .as_ref()
                .ok_or_else(|| NotaryError::malformed("validating request without transaction"))?;
            let verifier = self
                .verifier
                .clone()
                .ok_or_else(|| NotaryError::internal("validating flow without verifier"))?;
            self.with_deadline("transaction verification", verifier.verify(payload))
                .await
                .map_err(|err| match err {
                    e @ NotaryError::TransactionInvalid { .. } => e,
                    e @ NotaryError::Timeout { .. } => e,
                    other => NotaryError::TransactionInvalid {
                        reason: other.to_string(),
                    },
                })?;
        }

        self.advance(ProtocolState::CheckingTimeWindow)?;
        self.checker.check(request.time_window.as_ref())?;

        self.advance(ProtocolState::Committing)?;
        self.with_deadline(
            "uniqueness commit",
            self.provider.commit(
                &request.input_state_refs,
                request.tx_id,
                &request.requesting_party,
            ),
        )
        .await?;

        self.advance(ProtocolState::Signing)?;
        let attestation = self.signer.attest(request.tx_id);

        self.advance(ProtocolState::Responding)?;
        self.advance(ProtocolState::Done)?;
        Ok(attestation)
    }

    /// Shape checks that need no collaborator.
    fn screen_request(&self, request: &NotarizationRequest) -> NotaryResult<()> {
        if request.input_state_refs.is_empty() {
            return Err(NotaryError::malformed("empty input state ref set"));
        }
        if let Some(window) = &request.time_window {
            if window.is_inverted() {
                return Err(NotaryError::malformed("inverted time window"));
            }
        }
        if self.variant == NotaryVariant::Validating {
            let payload = request
                .transaction
                .as_ref()
                .ok_or_else(|| NotaryError::malformed("validating request without transaction"))?;
            if payload.derived_id() != request.tx_id {
                return Err(NotaryError::malformed(
                    "transaction payload does not hash to the declared id",
                ));
            }
        }
        Ok(())
    }
}

/// Verifier rejecting transactions whose ids are on a deny list; handy in
/// tests for exercising the validating failure path.
pub struct DenyListVerifier {
    denied: Vec<TxId>,
}

impl DenyListVerifier {
    /// Deny exactly the given ids.
    pub fn new(denied: Vec<TxId>) -> Self {
        Self { denied }
    }
}

#[async_trait]
impl TransactionVerifier for DenyListVerifier {
    async fn verify(&self, payload: &TransactionPayload) -> NotaryResult<()> {
        let id = payload.derived_id();
        if self.denied.contains(&id) {
            return Err(NotaryError::TransactionInvalid {
                reason: format!("transaction {id} rejected by verifier"),
            });
        }
        Ok(())
    }
}
