//! End-to-end notarization protocol tests over the persistent provider.

mod common;

use common::{alice, refs_of, tx};
use notarius::core::time::{ManualClock, TimeWindow, TimeWindowChecker, Timestamp};
use notarius::ledger::TxId;
use notarius::protocol::dispatcher::NotaryDispatcher;
use notarius::protocol::flow::{AcceptAllVerifier, DenyListVerifier, TransactionVerifier};
use notarius::protocol::messages::{
    FailureDetail, FailureKind, NotarizationRequest, NotarizationResponse, NotarySigner,
    TransactionPayload,
};
use notarius::protocol::NotaryVariant;
use notarius::uniqueness::persistent::PersistentUniquenessProvider;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const NOW_MS: u64 = 1_000_000;

struct Fixture {
    _dir: TempDir,
    provider: Arc<PersistentUniquenessProvider>,
    clock: Arc<ManualClock>,
    dispatcher: NotaryDispatcher,
}

fn fixture(variant: NotaryVariant, verifier: Option<Arc<dyn TransactionVerifier>>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(PersistentUniquenessProvider::open(dir.path()).unwrap());
    let clock = Arc::new(ManualClock::at(NOW_MS));
    let checker = TimeWindowChecker::new(clock.clone(), Duration::from_millis(1_000));
    let signer = Arc::new(NotarySigner::generate("notary-test"));
    let dispatcher = NotaryDispatcher::new(
        variant,
        checker,
        provider.clone(),
        signer,
        verifier,
        Duration::from_secs(5),
    )
    .unwrap();
    Fixture {
        _dir: dir,
        provider,
        clock,
        dispatcher,
    }
}

fn non_validating() -> Fixture {
    fixture(NotaryVariant::NonValidating, None)
}

fn request(tx_id: TxId, refs: Vec<notarius::ledger::StateRef>) -> NotarizationRequest {
    NotarizationRequest {
        tx_id,
        input_state_refs: refs,
        time_window: None,
        requesting_party: alice(),
        transaction: None,
    }
}

fn expect_failure(response: NotarizationResponse) -> (FailureKind, FailureDetail) {
    match response {
        NotarizationResponse::Failure { kind, detail } => (kind, detail),
        NotarizationResponse::Success { .. } => panic!("expected failure"),
    }
}

// ============================================================================
// Non-validating flow
// ============================================================================

#[tokio::test]
async fn notarization_returns_a_verifiable_attestation() {
    let fx = non_validating();
    let response = fx.dispatcher.handle(request(tx(9), refs_of(tx(1), 2))).await;

    let NotarizationResponse::Success { signature } = response else {
        panic!("expected success");
    };
    assert_eq!(signature.tx_id, tx(9));
    assert!(signature.verify());

    let stats = fx.dispatcher.stats().snapshot();
    assert_eq!(stats.notarized, 1);
}

#[tokio::test]
async fn double_spend_returns_conflict_naming_the_winner() {
    let fx = non_validating();
    let refs = refs_of(tx(1), 2);
    fx.dispatcher.handle(request(tx(9), refs.clone())).await;

    let response = fx.dispatcher.handle(request(tx(8), refs.clone())).await;
    let (kind, detail) = expect_failure(response);
    assert_eq!(kind, FailureKind::Conflict);
    let FailureDetail::Conflicts(report) = detail else {
        panic!("expected conflict detail");
    };
    assert_eq!(report.len(), 2);
    assert_eq!(report.winner_of(&refs[0]), Some(tx(9)));

    let stats = fx.dispatcher.stats().snapshot();
    assert_eq!(stats.rejected_terminal, 1);
}

#[tokio::test]
async fn identical_resubmission_is_notarized_again() {
    let fx = non_validating();
    let refs = refs_of(tx(1), 1);
    fx.dispatcher.handle(request(tx(9), refs.clone())).await;

    let response = fx.dispatcher.handle(request(tx(9), refs)).await;
    assert!(matches!(response, NotarizationResponse::Success { .. }));
}

#[tokio::test]
async fn empty_ref_set_is_malformed() {
    let fx = non_validating();
    let response = fx.dispatcher.handle(request(tx(9), Vec::new())).await;
    let (kind, _) = expect_failure(response);
    assert_eq!(kind, FailureKind::RequestMalformed);
    // Nothing reached the provider.
    assert_eq!(fx.provider.stats().snapshot().committed_batches, 0);
}

#[tokio::test]
async fn inverted_window_is_malformed() {
    let fx = non_validating();
    let mut req = request(tx(9), refs_of(tx(1), 1));
    req.time_window = Some(TimeWindow::between(
        Timestamp::from_ms(NOW_MS + 10_000),
        Timestamp::from_ms(NOW_MS),
    ));
    let (kind, _) = expect_failure(fx.dispatcher.handle(req).await);
    assert_eq!(kind, FailureKind::RequestMalformed);
}

#[tokio::test]
async fn expired_window_is_rejected_before_commit() {
    let fx = non_validating();
    let refs = refs_of(tx(1), 1);
    let mut req = request(tx(9), refs.clone());
    req.time_window = Some(TimeWindow::until_only(Timestamp::from_ms(NOW_MS - 5_000)));

    let (kind, _) = expect_failure(fx.dispatcher.handle(req).await);
    assert_eq!(kind, FailureKind::TimeWindowOutOfBounds);
    // The refs were not consumed, so a timely retry succeeds.
    let response = fx.dispatcher.handle(request(tx(9), refs)).await;
    assert!(matches!(response, NotarizationResponse::Success { .. }));
}

#[tokio::test]
async fn window_within_tolerance_passes() {
    let fx = non_validating();
    // Expired 500ms ago; tolerance is 1000ms.
    fx.clock.set(NOW_MS);
    let mut req = request(tx(9), refs_of(tx(1), 1));
    req.time_window = Some(TimeWindow::until_only(Timestamp::from_ms(NOW_MS - 500)));
    let response = fx.dispatcher.handle(req).await;
    assert!(matches!(response, NotarizationResponse::Success { .. }));
}

// ============================================================================
// Validating flow
// ============================================================================

fn validating_request(payload: &[u8]) -> NotarizationRequest {
    let transaction = TransactionPayload {
        bytes: payload.to_vec(),
    };
    let tx_id = transaction.derived_id();
    NotarizationRequest {
        tx_id,
        input_state_refs: refs_of(tx(1), 1),
        time_window: None,
        requesting_party: alice(),
        transaction: Some(transaction),
    }
}

#[tokio::test]
async fn validating_flow_notarizes_verified_transactions() {
    let fx = fixture(NotaryVariant::Validating, Some(Arc::new(AcceptAllVerifier)));
    let response = fx.dispatcher.handle(validating_request(b"payload")).await;
    assert!(matches!(response, NotarizationResponse::Success { .. }));
}

#[tokio::test]
async fn validating_flow_requires_the_payload() {
    let fx = fixture(NotaryVariant::Validating, Some(Arc::new(AcceptAllVerifier)));
    let response = fx.dispatcher.handle(request(tx(9), refs_of(tx(1), 1))).await;
    let (kind, _) = expect_failure(response);
    assert_eq!(kind, FailureKind::RequestMalformed);
}

#[tokio::test]
async fn payload_id_mismatch_is_malformed() {
    let fx = fixture(NotaryVariant::Validating, Some(Arc::new(AcceptAllVerifier)));
    let mut req = validating_request(b"payload");
    req.tx_id = tx(77);
    let (kind, _) = expect_failure(fx.dispatcher.handle(req).await);
    assert_eq!(kind, FailureKind::RequestMalformed);
}

#[tokio::test]
async fn rejected_transaction_never_reaches_consensus() {
    let denied = TransactionPayload {
        bytes: b"bad payload".to_vec(),
    }
    .derived_id();
    let fx = fixture(
        NotaryVariant::Validating,
        Some(Arc::new(DenyListVerifier::new(vec![denied]))),
    );

    let req = validating_request(b"bad payload");
    let (kind, _) = expect_failure(fx.dispatcher.handle(req).await);
    assert_eq!(kind, FailureKind::TransactionInvalid);

    // The input refs stay unconsumed.
    assert_eq!(fx.provider.stats().snapshot().committed_batches, 0);
}

#[tokio::test]
async fn validating_dispatcher_requires_a_verifier() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(PersistentUniquenessProvider::open(dir.path()).unwrap());
    let checker = TimeWindowChecker::new(Arc::new(ManualClock::at(0)), Duration::ZERO);
    let result = NotaryDispatcher::new(
        NotaryVariant::Validating,
        checker,
        provider,
        Arc::new(NotarySigner::generate("notary-test")),
        None,
        Duration::from_secs(1),
    );
    assert!(result.is_err());
}
