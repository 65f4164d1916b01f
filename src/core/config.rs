//! Configuration parsing and validation.
//!
//! Notarius configuration is loaded from TOML files with CLI overrides.
//! Every timeout in the system - time-window tolerance, protocol step
//! deadlines, election timeout range, heartbeat interval - lives here;
//! nothing is hardcoded.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level Notarius configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity and signing key material.
    pub identity: IdentityConfig,

    /// Notarization service behavior.
    #[serde(default)]
    pub notary: NotaryConfig,

    /// Uniqueness provider selection and tuning.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Replication cluster settings (replicated provider only).
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Network listener settings.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Filesystem paths.
    #[serde(default)]
    pub paths: PathConfig,
}

/// Node identity and signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Display name for this notary node.
    pub name: String,

    /// Hex-encoded 32-byte ed25519 signing key seed.
    pub signing_key_hex: String,
}

/// Notarization behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotaryConfig {
    /// Protocol variant: "validating" or "non-validating".
    #[serde(default = "default_variant")]
    pub variant: String,

    /// Time-window tolerance in milliseconds.
    #[serde(default = "default_window_tolerance_ms")]
    pub window_tolerance_ms: u64,

    /// Deadline for a single protocol step in milliseconds.
    #[serde(default = "default_step_deadline_ms")]
    pub step_deadline_ms: u64,

    /// Idle timeout after which an abandoned protocol instance is discarded,
    /// in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_variant() -> String {
    "non-validating".to_string()
}

fn default_window_tolerance_ms() -> u64 {
    30_000
}

fn default_step_deadline_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            window_tolerance_ms: default_window_tolerance_ms(),
            step_deadline_ms: default_step_deadline_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl NotaryConfig {
    /// Time-window tolerance as a duration.
    pub fn window_tolerance(&self) -> Duration {
        Duration::from_millis(self.window_tolerance_ms)
    }

    /// Per-step deadline as a duration.
    pub fn step_deadline(&self) -> Duration {
        Duration::from_millis(self.step_deadline_ms)
    }
}

/// Uniqueness provider selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider mode: "persistent" (single node) or "replicated" (Raft).
    #[serde(default = "default_provider_mode")]
    pub mode: String,

    /// Deadline for a replicated commit to reach majority, in milliseconds.
    #[serde(default = "default_commit_deadline_ms")]
    pub commit_deadline_ms: u64,
}

fn default_provider_mode() -> String {
    "persistent".to_string()
}

fn default_commit_deadline_ms() -> u64 {
    5_000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mode: default_provider_mode(),
            commit_deadline_ms: default_commit_deadline_ms(),
        }
    }
}

impl ProviderConfig {
    /// Commit deadline as a duration.
    pub fn commit_deadline(&self) -> Duration {
        Duration::from_millis(self.commit_deadline_ms)
    }
}

/// Replication cluster membership and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's id within the cluster.
    #[serde(default)]
    pub node_id: u64,

    /// Peer definitions, including this node.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Lower bound of the randomized election timeout, in milliseconds.
    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,

    /// Upper bound of the randomized election timeout, in milliseconds.
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,

    /// Leader heartbeat interval, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

/// One cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer node id.
    pub node_id: u64,

    /// Peer Raft RPC address, e.g. "127.0.0.1:7401".
    pub address: String,
}

fn default_election_timeout_min_ms() -> u64 {
    150
}

fn default_election_timeout_max_ms() -> u64 {
    300
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            peers: Vec::new(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl ClusterConfig {
    /// Election timeout range as durations.
    pub fn election_timeout_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.election_timeout_min_ms),
            Duration::from_millis(self.election_timeout_max_ms),
        )
    }

    /// Heartbeat interval as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Client-facing listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address for client notarization requests.
    #[serde(default = "default_client_bind")]
    pub client_bind: String,

    /// Bind address for inter-node Raft RPCs (replicated mode).
    #[serde(default)]
    pub raft_bind: Option<String>,

    /// Maximum accepted frame size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
}

fn default_client_bind() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_max_frame_bytes() -> u32 {
    4 * 1024 * 1024
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            client_bind: default_client_bind(),
            raft_bind: None,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Data directory for the commit store and replication log.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.identity.name.is_empty() {
            bail!("identity.name must not be empty");
        }
        if hex::decode(&self.identity.signing_key_hex)
            .map(|b| b.len() != 32)
            .unwrap_or(true)
        {
            bail!("identity.signing_key_hex must be 32 bytes of hex");
        }

        match self.notary.variant.as_str() {
            "validating" | "non-validating" => {}
            other => bail!("notary.variant must be \"validating\" or \"non-validating\", got {other:?}"),
        }

        match self.provider.mode.as_str() {
            "persistent" => {}
            "replicated" => {
                if self.cluster.peers.len() < 2 {
                    bail!("provider.mode = \"replicated\" requires at least 2 cluster.peers");
                }
                if !self
                    .cluster
                    .peers
                    .iter()
                    .any(|p| p.node_id == self.cluster.node_id)
                {
                    bail!(
                        "cluster.node_id {} is not listed in cluster.peers",
                        self.cluster.node_id
                    );
                }
                if self.listener.raft_bind.is_none() {
                    bail!("provider.mode = \"replicated\" requires listener.raft_bind");
                }
            }
            other => bail!("provider.mode must be \"persistent\" or \"replicated\", got {other:?}"),
        }

        if self.cluster.election_timeout_min_ms == 0
            || self.cluster.election_timeout_min_ms >= self.cluster.election_timeout_max_ms
        {
            bail!("cluster election timeout range must satisfy 0 < min < max");
        }
        if self.cluster.heartbeat_interval_ms >= self.cluster.election_timeout_min_ms {
            bail!("cluster.heartbeat_interval_ms must be below election_timeout_min_ms");
        }

        let mut seen = std::collections::HashSet::new();
        for peer in &self.cluster.peers {
            if !seen.insert(peer.node_id) {
                bail!("duplicate cluster.peers node_id {}", peer.node_id);
            }
        }

        Ok(())
    }

    /// Whether the validating protocol variant is configured.
    pub fn is_validating(&self) -> bool {
        self.notary.variant == "validating"
    }

    /// Whether the replicated provider is configured.
    pub fn is_replicated(&self) -> bool {
        self.provider.mode == "replicated"
    }
}
