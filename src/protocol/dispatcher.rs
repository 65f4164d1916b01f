//! Stateless request router.
//!
//! One dispatcher per process holds the shared collaborators and builds a
//! fresh [`NotaryFlow`] per request; there is no per-connection or
//! per-client state to corrupt.

use crate::core::error::NotaryError;
use crate::core::time::TimeWindowChecker;
use crate::ops::telemetry::NotaryStats;
use crate::protocol::flow::{NotaryFlow, TransactionVerifier};
use crate::protocol::messages::{NotarizationRequest, NotarizationResponse, NotarySigner};
use crate::protocol::NotaryVariant;
use crate::uniqueness::UniquenessProvider;
use std::sync::Arc;
use std::time::Duration;

/// Routes inbound requests to fresh protocol flows.
pub struct NotaryDispatcher {
    variant: NotaryVariant,
    checker: TimeWindowChecker,
    provider: Arc<dyn UniquenessProvider>,
    signer: Arc<NotarySigner>,
    verifier: Option<Arc<dyn TransactionVerifier>>,
    step_deadline: Duration,
    stats: Arc<NotaryStats>,
}

impl NotaryDispatcher {
    /// Assemble a dispatcher. Validating variant requires a verifier.
    pub fn new(
        variant: NotaryVariant,
        checker: TimeWindowChecker,
        provider: Arc<dyn UniquenessProvider>,
        signer: Arc<NotarySigner>,
        verifier: Option<Arc<dyn TransactionVerifier>>,
        step_deadline: Duration,
    ) -> Result<Self, NotaryError> {
        if variant == NotaryVariant::Validating && verifier.is_none() {
            return Err(NotaryError::internal(
                "validating variant configured without a verifier",
            ));
        }
        Ok(Self {
            variant,
            checker,
            provider,
            signer,
            verifier,
            step_deadline,
            stats: Arc::new(NotaryStats::new()),
        })
    }

    /// The configured variant.
    pub fn variant(&self) -> NotaryVariant {
        self.variant
    }

    /// Request-path counters.
    pub fn stats(&self) -> &Arc<NotaryStats> {
        &self.stats
    }

    /// Serve one request end to end.
    pub async fn handle(&self, request: NotarizationRequest) -> NotarizationResponse {
        self.stats.record_request();
        let mut flow = NotaryFlow::new(
            self.variant,
            self.checker.clone(),
            self.provider.clone(),
            self.signer.clone(),
            self.verifier.clone(),
            self.step_deadline,
        );

        match flow.run(&request).await {
            Ok(signature) => {
                self.stats.record_notarized();
                tracing::info!(tx = %request.tx_id, party = %request.requesting_party, "transaction notarized");
                NotarizationResponse::Success { signature }
            }
            Err(err) => {
                if err.is_terminal() {
                    self.stats.record_rejected();
                    tracing::info!(tx = %request.tx_id, party = %request.requesting_party, %err, "request rejected");
                } else {
                    self.stats.record_retryable();
                    tracing::debug!(tx = %request.tx_id, %err, "request failed, retryable");
                }
                NotarizationResponse::from_error(&err)
            }
        }
    }
}
