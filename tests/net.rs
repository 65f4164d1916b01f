//! Client listener tests over real loopback sockets.

mod common;

use async_trait::async_trait;
use common::{alice, refs_of, tx};
use notarius::core::time::{ManualClock, TimeWindowChecker};
use notarius::net::codec;
use notarius::net::listener::{spawn_client_listener, StatusSource};
use notarius::ops::telemetry::{CommitStats, NotaryStats};
use notarius::protocol::dispatcher::NotaryDispatcher;
use notarius::protocol::messages::{
    ClientRequest, ClientResponse, FailureKind, NodeStatus, NotarizationRequest,
    NotarizationResponse, NotarySigner,
};
use notarius::protocol::NotaryVariant;
use notarius::uniqueness::persistent::PersistentUniquenessProvider;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

const MAX_FRAME: usize = 1024 * 1024;

struct FixedStatus;

#[async_trait]
impl StatusSource for FixedStatus {
    async fn status(&self) -> NodeStatus {
        NodeStatus {
            notary: "notary-test".into(),
            variant: "non-validating".into(),
            provider_mode: "persistent".into(),
            consensus: None,
            requests: NotaryStats::new().snapshot(),
            commits: CommitStats::new().snapshot(),
        }
    }
}

async fn start_listener() -> (TempDir, std::net::SocketAddr, watch::Sender<bool>) {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(PersistentUniquenessProvider::open(dir.path()).unwrap());
    let checker = TimeWindowChecker::new(Arc::new(ManualClock::at(0)), Duration::ZERO);
    let dispatcher = Arc::new(
        NotaryDispatcher::new(
            NotaryVariant::NonValidating,
            checker,
            provider,
            Arc::new(NotarySigner::generate("notary-test")),
            None,
            Duration::from_secs(5),
        )
        .unwrap(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (addr, _task) = spawn_client_listener(
        "127.0.0.1:0",
        dispatcher,
        Arc::new(FixedStatus),
        MAX_FRAME,
        Duration::from_secs(5),
        shutdown_rx,
    )
    .await
    .unwrap();
    (dir, addr, shutdown_tx)
}

fn notarize_request(tx_byte: u8, producer: u8) -> ClientRequest {
    ClientRequest::Notarize(Box::new(NotarizationRequest {
        tx_id: tx(tx_byte),
        input_state_refs: refs_of(tx(producer), 1),
        time_window: None,
        requesting_party: alice(),
        transaction: None,
    }))
}

async fn round_trip(stream: &mut TcpStream, request: &ClientRequest) -> ClientResponse {
    codec::write_frame(stream, request, MAX_FRAME).await.unwrap();
    codec::read_frame::<_, ClientResponse>(stream, MAX_FRAME)
        .await
        .unwrap()
        .expect("connection closed mid round trip")
}

#[tokio::test]
async fn notarizes_over_the_wire() {
    let (_dir, addr, _shutdown) = start_listener().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = round_trip(&mut stream, &notarize_request(9, 1)).await;
    let ClientResponse::Notarization(NotarizationResponse::Success { signature }) = response else {
        panic!("expected success");
    };
    assert_eq!(signature.tx_id, tx(9));
    assert!(signature.verify());
}

#[tokio::test]
async fn connection_carries_multiple_round_trips() {
    let (_dir, addr, _shutdown) = start_listener().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let first = round_trip(&mut stream, &notarize_request(9, 1)).await;
    assert!(matches!(
        first,
        ClientResponse::Notarization(NotarizationResponse::Success { .. })
    ));

    // Same refs from a different transaction: the conflict comes back over
    // the same connection.
    let second = round_trip(&mut stream, &notarize_request(8, 1)).await;
    let ClientResponse::Notarization(NotarizationResponse::Failure { .. }) = second else {
        panic!("expected failure");
    };
}

#[tokio::test]
async fn status_round_trip() {
    let (_dir, addr, _shutdown) = start_listener().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = round_trip(&mut stream, &ClientRequest::Status).await;
    let ClientResponse::Status(status) = response else {
        panic!("expected status");
    };
    assert_eq!(status.notary, "notary-test");
    assert_eq!(status.provider_mode, "persistent");
    assert!(status.consensus.is_none());
}

#[tokio::test]
async fn undecodable_frame_gets_a_malformed_reply() {
    let (_dir, addr, _shutdown) = start_listener().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // A well-formed frame whose payload is not a request.
    let payload = b"not json";
    let mut raw = (payload.len() as u32).to_le_bytes().to_vec();
    raw.extend_from_slice(payload);
    stream.write_all(&raw).await.unwrap();

    let reply = codec::read_frame::<_, ClientResponse>(&mut stream, MAX_FRAME)
        .await
        .unwrap()
        .expect("connection closed without a reply");
    let ClientResponse::Notarization(NotarizationResponse::Failure { kind, .. }) = reply else {
        panic!("expected failure");
    };
    assert_eq!(kind, FailureKind::RequestMalformed);

    // The connection is closed after the reply.
    let next = codec::read_frame::<_, ClientResponse>(&mut stream, MAX_FRAME)
        .await
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn listener_stops_on_shutdown_signal() {
    let (_dir, addr, shutdown) = start_listener().await;
    shutdown.send(true).unwrap();
    // Give the accept loop a moment to observe the signal.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(TcpStream::connect(addr).await.is_err());
}
