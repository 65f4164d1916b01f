//! Runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: storage/log → uniqueness provider → dispatcher → listeners
//! - Shutdown order: listeners → provider → storage

use crate::core::config::Config;
use crate::core::time::{SystemClock, TimeWindowChecker};
use crate::net::listener::{spawn_client_listener, StatusSource};
use crate::net::transport::{spawn_raft_listener, TcpRaftTransport};
use crate::ops::telemetry::{CommitStatsSnapshot, RaftStats};
use crate::protocol::dispatcher::NotaryDispatcher;
use crate::protocol::flow::{AcceptAllVerifier, TransactionVerifier};
use crate::protocol::messages::{NodeStatus, NotarySigner};
use crate::protocol::NotaryVariant;
use crate::raft::node::{RaftNode, RaftTimings};
use crate::raft::provider::{RaftDriver, RaftHandle, ReplicatedUniquenessProvider};
use crate::raft::state::{Membership, NodeId};
use crate::uniqueness::persistent::PersistentUniquenessProvider;
use crate::uniqueness::UniquenessProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Queue depth for inbound consensus envelopes.
const RAFT_INBOUND_DEPTH: usize = 1024;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component has stopped.
    Stopped,
}

/// Health of every runtime component.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeHealth {
    /// Durable storage (commit store or replicated log).
    pub storage: ComponentHealth,
    /// The uniqueness provider.
    pub provider: ComponentHealth,
    /// Dispatcher and protocol collaborators.
    pub dispatcher: ComponentHealth,
    /// Network listeners.
    pub listeners: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            storage: ComponentHealth::Starting,
            provider: ComponentHealth::Starting,
            dispatcher: ComponentHealth::Starting,
            listeners: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Whether every component is serving.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.storage, self.provider, self.dispatcher, self.listeners),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy
            )
        )
    }
}

/// The configured provider with the handles its mode exposes.
enum ProviderStack {
    Persistent(Arc<PersistentUniquenessProvider>),
    Replicated {
        provider: Arc<ReplicatedUniquenessProvider>,
        handle: RaftHandle,
    },
}

impl ProviderStack {
    fn mode(&self) -> &'static str {
        match self {
            Self::Persistent(_) => "persistent",
            Self::Replicated { .. } => "replicated",
        }
    }

    fn as_provider(&self) -> Arc<dyn UniquenessProvider> {
        match self {
            Self::Persistent(p) => p.clone(),
            Self::Replicated { provider, .. } => provider.clone(),
        }
    }

}

/// The assembled node.
pub struct Runtime {
    config: Config,
    data_dir: PathBuf,
    health: RuntimeHealth,
    provider: Option<ProviderStack>,
    dispatcher: Option<Arc<NotaryDispatcher>>,
    raft_stats: Arc<RaftStats>,
    client_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a runtime from validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let data_dir = PathBuf::from(&config.paths.data_dir);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            data_dir,
            health: RuntimeHealth::default(),
            provider: None,
            dispatcher: None,
            raft_stats: Arc::new(RaftStats::new()),
            client_addr: None,
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Component health.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Whether the runtime has started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Address the client listener actually bound.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// A receiver that flips to `true` on shutdown.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Start every component in order.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            notary = %self.config.identity.name,
            variant = %self.config.notary.variant,
            provider = %self.config.provider.mode,
            data_dir = %self.data_dir.display(),
            "starting notarius runtime"
        );

        let provider = self
            .init_provider()
            .await
            .context("failed to start uniqueness provider")?;
        self.health.storage = ComponentHealth::Healthy;
        self.health.provider = ComponentHealth::Healthy;

        let dispatcher = self
            .init_dispatcher(&provider)
            .context("failed to assemble dispatcher")?;
        self.health.dispatcher = ComponentHealth::Healthy;

        self.start_client_listener(&provider, dispatcher.clone())
            .await
            .context("failed to start client listener")?;
        self.health.listeners = ComponentHealth::Healthy;

        self.provider = Some(provider);
        self.dispatcher = Some(dispatcher);
        self.running.store(true, Ordering::Release);
        tracing::info!("notarius runtime started");
        Ok(())
    }

    async fn init_provider(&mut self) -> Result<ProviderStack> {
        if !self.config.is_replicated() {
            let provider = PersistentUniquenessProvider::open(&self.data_dir)
                .context("failed to open commit store")?;
            tracing::info!("persistent uniqueness provider ready");
            return Ok(ProviderStack::Persistent(Arc::new(provider)));
        }

        let cluster = &self.config.cluster;
        let node_id = NodeId(cluster.node_id);
        let membership =
            Membership::new(cluster.peers.iter().map(|p| NodeId(p.node_id)).collect());
        let (timeout_min, timeout_max) = cluster.election_timeout_range();
        let timings = RaftTimings {
            election_timeout_min: timeout_min,
            election_timeout_max: timeout_max,
            heartbeat_interval: cluster.heartbeat_interval(),
        };

        let node = RaftNode::open(node_id, membership, timings, &self.data_dir)
            .context("failed to recover replicated log")?;

        let max_frame = self.config.listener.max_frame_bytes as usize;
        let peer_addresses: HashMap<NodeId, String> = cluster
            .peers
            .iter()
            .filter(|p| p.node_id != cluster.node_id)
            .map(|p| (NodeId(p.node_id), p.address.clone()))
            .collect();
        let transport = Arc::new(TcpRaftTransport::new(peer_addresses, max_frame));

        let (inbound_tx, inbound_rx) = mpsc::channel(RAFT_INBOUND_DEPTH);
        let raft_bind = self
            .config
            .listener
            .raft_bind
            .clone()
            .context("replicated mode requires listener.raft_bind")?;
        let raft_listener = spawn_raft_listener(&raft_bind, inbound_tx, max_frame)
            .await
            .context("failed to bind consensus listener")?;
        self.tasks.push(raft_listener);

        let tick_interval = (cluster.heartbeat_interval() / 2).max(Duration::from_millis(5));
        let (driver, handle) = RaftDriver::new(
            node,
            transport,
            inbound_rx,
            self.shutdown_rx.clone(),
            tick_interval,
            self.raft_stats.clone(),
        );
        self.tasks.push(tokio::spawn(driver.run()));

        let provider = Arc::new(ReplicatedUniquenessProvider::new(
            &handle,
            self.config.provider.commit_deadline(),
        ));
        tracing::info!(node = %node_id, "replicated uniqueness provider ready");
        Ok(ProviderStack::Replicated { provider, handle })
    }

    fn init_dispatcher(&self, provider: &ProviderStack) -> Result<Arc<NotaryDispatcher>> {
        let variant = if self.config.is_validating() {
            NotaryVariant::Validating
        } else {
            NotaryVariant::NonValidating
        };
        let checker = TimeWindowChecker::new(
            Arc::new(SystemClock),
            self.config.notary.window_tolerance(),
        );
        let signer = Arc::new(
            NotarySigner::from_seed_hex(
                self.config.identity.name.clone(),
                &self.config.identity.signing_key_hex,
            )
            .context("invalid identity.signing_key_hex")?,
        );
        let verifier: Option<Arc<dyn TransactionVerifier>> = match variant {
            NotaryVariant::Validating => Some(Arc::new(AcceptAllVerifier)),
            NotaryVariant::NonValidating => None,
        };

        let dispatcher = NotaryDispatcher::new(
            variant,
            checker,
            provider.as_provider(),
            signer,
            verifier,
            self.config.notary.step_deadline(),
        )
        .context("dispatcher assembly failed")?;
        Ok(Arc::new(dispatcher))
    }

    async fn start_client_listener(
        &mut self,
        provider: &ProviderStack,
        dispatcher: Arc<NotaryDispatcher>,
    ) -> Result<()> {
        let status: Arc<dyn StatusSource> = Arc::new(RuntimeStatusSource {
            notary: self.config.identity.name.clone(),
            variant: self.config.notary.variant.clone(),
            mode: provider.mode().to_string(),
            raft: match provider {
                ProviderStack::Replicated { handle, .. } => Some(handle.clone()),
                ProviderStack::Persistent(_) => None,
            },
            dispatcher: dispatcher.clone(),
            commits: CommitStatsHandle::from(provider),
        });

        let (addr, task) = spawn_client_listener(
            &self.config.listener.client_bind,
            dispatcher,
            status,
            self.config.listener.max_frame_bytes as usize,
            Duration::from_millis(self.config.notary.idle_timeout_ms),
            self.shutdown_rx.clone(),
        )
        .await?;
        self.client_addr = Some(addr);
        self.tasks.push(task);
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Serve until ctrl-c or an explicit shutdown, then stop.
    pub async fn run(&mut self) -> Result<()> {
        let mut shutdown = self.shutdown_rx.clone();
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                tracing::info!("ctrl-c received");
            }
            _ = shutdown.changed() => {}
        }
        self.stop().await;
        Ok(())
    }

    /// Stop components in reverse start order.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!("stopping notarius runtime");
        let _ = self.shutdown_tx.send(true);

        // Listener and driver tasks watch the shutdown channel; give them a
        // moment, then abort stragglers (the consensus accept loop blocks
        // on accept and has no other exit).
        tokio::time::sleep(Duration::from_millis(50)).await;
        for task in self.tasks.drain(..) {
            task.abort();
        }

        self.health.listeners = ComponentHealth::Stopped;
        self.health.dispatcher = ComponentHealth::Stopped;
        self.health.provider = ComponentHealth::Stopped;
        self.health.storage = ComponentHealth::Stopped;
        self.dispatcher = None;
        self.provider = None;
        tracing::info!("notarius runtime stopped");
    }
}

/// Commit-stats access for the status surface, by provider mode.
enum CommitStatsHandle {
    Persistent(Arc<PersistentUniquenessProvider>),
    Replicated(Arc<ReplicatedUniquenessProvider>),
}

impl From<&ProviderStack> for CommitStatsHandle {
    fn from(stack: &ProviderStack) -> Self {
        match stack {
            ProviderStack::Persistent(p) => Self::Persistent(p.clone()),
            ProviderStack::Replicated { provider, .. } => Self::Replicated(provider.clone()),
        }
    }
}

impl CommitStatsHandle {
    fn snapshot(&self) -> CommitStatsSnapshot {
        match self {
            Self::Persistent(p) => p.stats().snapshot(),
            Self::Replicated(p) => p.stats().snapshot(),
        }
    }
}

struct RuntimeStatusSource {
    notary: String,
    variant: String,
    mode: String,
    raft: Option<RaftHandle>,
    dispatcher: Arc<NotaryDispatcher>,
    commits: CommitStatsHandle,
}

#[async_trait]
impl StatusSource for RuntimeStatusSource {
    async fn status(&self) -> NodeStatus {
        let consensus = match &self.raft {
            Some(handle) => handle.status().await,
            None => None,
        };
        NodeStatus {
            notary: self.notary.clone(),
            variant: self.variant.clone(),
            provider_mode: self.mode.clone(),
            consensus,
            requests: self.dispatcher.stats().snapshot(),
            commits: self.commits.snapshot(),
        }
    }
}
