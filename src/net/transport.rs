//! Peer-to-peer transport for consensus traffic.
//!
//! The consensus driver sends fire-and-forget envelopes; delivery is best
//! effort. The protocol tolerates loss (retransmission falls out of
//! heartbeats and replies), so a send never blocks the driver: each peer
//! has a bounded queue drained by a writer task that reconnects on error.

use crate::core::error::{NotaryError, NotaryResult};
use crate::net::codec;
use crate::raft::rpc::RaftEnvelope;
use crate::raft::state::NodeId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Per-peer outbound queue depth. Overflow drops the oldest traffic first
/// in effect, since heartbeats keep coming.
const PEER_QUEUE_DEPTH: usize = 256;

/// Backoff between reconnect attempts to an unreachable peer.
const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// Delivery of consensus envelopes to peers.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    /// Queue `envelope` for delivery to `to`. Best effort.
    async fn send(&self, to: NodeId, envelope: RaftEnvelope);
}

/// TCP transport over the cluster's configured peer addresses.
pub struct TcpRaftTransport {
    peers: HashMap<NodeId, String>,
    queues: Mutex<HashMap<NodeId, mpsc::Sender<RaftEnvelope>>>,
    max_frame: usize,
}

impl TcpRaftTransport {
    /// Build a transport for the given peer address map.
    pub fn new(peers: HashMap<NodeId, String>, max_frame: usize) -> Self {
        Self {
            peers,
            queues: Mutex::new(HashMap::new()),
            max_frame,
        }
    }

    fn queue_for(&self, peer: NodeId) -> Option<mpsc::Sender<RaftEnvelope>> {
        let mut queues = self.queues.lock();
        if let Some(tx) = queues.get(&peer) {
            if !tx.is_closed() {
                return Some(tx.clone());
            }
        }
        let address = self.peers.get(&peer)?.clone();
        let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
        tokio::spawn(peer_writer(peer, address, rx, self.max_frame));
        queues.insert(peer, tx.clone());
        Some(tx)
    }
}

#[async_trait]
impl RaftTransport for TcpRaftTransport {
    async fn send(&self, to: NodeId, envelope: RaftEnvelope) {
        let Some(queue) = self.queue_for(to) else {
            tracing::warn!(peer = %to, "no address for peer, dropping envelope");
            return;
        };
        if queue.try_send(envelope).is_err() {
            tracing::debug!(peer = %to, "peer queue full, dropping envelope");
        }
    }
}

/// Drains one peer's queue into its socket, reconnecting on failure.
async fn peer_writer(
    peer: NodeId,
    address: String,
    mut rx: mpsc::Receiver<RaftEnvelope>,
    max_frame: usize,
) {
    loop {
        let Some(mut envelope) = rx.recv().await else {
            return;
        };
        let mut stream = loop {
            match TcpStream::connect(&address).await {
                Ok(s) => break s,
                Err(err) => {
                    tracing::debug!(peer = %peer, %address, %err, "peer connect failed");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    // Stale traffic is worthless after a reconnect delay;
                    // keep only the newest envelope.
                    while let Ok(next) = rx.try_recv() {
                        envelope = next;
                    }
                }
            }
        };
        tracing::debug!(peer = %peer, %address, "peer connection established");

        let mut pending = Some(envelope);
        loop {
            let envelope = match pending.take() {
                Some(e) => e,
                None => match rx.recv().await {
                    Some(e) => e,
                    None => return,
                },
            };
            if let Err(err) = codec::write_frame(&mut stream, &envelope, max_frame).await {
                tracing::debug!(peer = %peer, %err, "peer write failed, reconnecting");
                break;
            }
        }
    }
}

/// Accept peer connections on `bind` and forward decoded envelopes to
/// `inbound`. Runs until the listener task is aborted or `inbound` closes.
pub async fn spawn_raft_listener(
    bind: &str,
    inbound: mpsc::Sender<RaftEnvelope>,
    max_frame: usize,
) -> NotaryResult<JoinHandle<()>> {
    let listener = TcpListener::bind(bind).await.map_err(NotaryError::network)?;
    let local = listener.local_addr().map_err(NotaryError::network)?;
    tracing::info!(%local, "consensus listener bound");

    Ok(tokio::spawn(async move {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(%err, "consensus accept failed");
                    continue;
                }
            };
            let inbound = inbound.clone();
            tokio::spawn(async move {
                let mut stream = stream;
                loop {
                    match codec::read_frame::<_, RaftEnvelope>(&mut stream, max_frame).await {
                        Ok(Some(envelope)) => {
                            if inbound.send(envelope).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => return,
                        Err(err) => {
                            tracing::debug!(%remote, %err, "peer read failed");
                            return;
                        }
                    }
                }
            });
        }
    }))
}

/// In-process transport for multi-node tests: envelopes land directly on
/// the destination's inbound channel.
#[derive(Default)]
pub struct LocalTransport {
    inboxes: Mutex<HashMap<NodeId, mpsc::Sender<RaftEnvelope>>>,
}

impl LocalTransport {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node's inbound channel.
    pub fn register(&self, id: NodeId, inbox: mpsc::Sender<RaftEnvelope>) {
        self.inboxes.lock().insert(id, inbox);
    }
}

#[async_trait]
impl RaftTransport for LocalTransport {
    async fn send(&self, to: NodeId, envelope: RaftEnvelope) {
        let inbox = self.inboxes.lock().get(&to).cloned();
        if let Some(inbox) = inbox {
            let _ = inbox.try_send(envelope);
        }
    }
}
