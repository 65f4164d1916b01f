//! Replicated uniqueness provider and its driver task.
//!
//! The driver owns the [`RaftNode`] and serializes everything that touches
//! it: timer ticks, peer messages, and client commands all arrive on the
//! same select loop. Client commits become pending proposals keyed by log
//! index; when the entry at that index is applied with the expected term
//! the waiting caller gets the authoritative outcome. If leadership or the
//! term changes first, the proposal resolves as retryable - never as a
//! conflict - because nothing definitive is known.

use crate::core::error::{NotaryError, NotaryResult};
use crate::ledger::{Party, StateRef, TxId};
use crate::net::transport::RaftTransport;
use crate::ops::telemetry::{CommitStats, RaftStats};
use crate::raft::apply::ApplyResult;
use crate::raft::log::EntryBatch;
use crate::raft::node::RaftNode;
use crate::raft::rpc::{Outbound, RaftEnvelope};
use crate::raft::state::{NodeId, Role};
use crate::uniqueness::UniquenessProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Command queue depth between providers and the driver.
const COMMAND_QUEUE_DEPTH: usize = 1024;

/// A command for the driver loop.
pub enum RaftCommand {
    /// Propose a commit batch; the reply resolves at apply time.
    Propose {
        batch: EntryBatch,
        reply: oneshot::Sender<NotaryResult<()>>,
    },

    /// Leader-only read of the applied commit map.
    Query {
        state_refs: Vec<StateRef>,
        reply: oneshot::Sender<NotaryResult<Vec<(StateRef, TxId)>>>,
    },

    /// Snapshot of the node's consensus position.
    Status { reply: oneshot::Sender<RaftStatus> },
}

/// Point-in-time view of a node's consensus position.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RaftStatus {
    pub id: NodeId,
    pub role: Role,
    pub term: u64,
    pub leader_hint: Option<NodeId>,
    pub commit_index: u64,
    pub last_index: u64,
}

/// Handle for submitting commands to a running driver.
#[derive(Clone)]
pub struct RaftHandle {
    commands: mpsc::Sender<RaftCommand>,
}

impl RaftHandle {
    /// Current consensus status, or `None` if the driver has stopped.
    pub async fn status(&self) -> Option<RaftStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(RaftCommand::Status { reply: tx })
            .await
            .ok()?;
        rx.await.ok()
    }
}

struct PendingProposal {
    term: u64,
    reply: oneshot::Sender<NotaryResult<()>>,
}

/// The single-threaded consensus event loop.
pub struct RaftDriver {
    node: RaftNode,
    transport: Arc<dyn RaftTransport>,
    inbound: mpsc::Receiver<RaftEnvelope>,
    commands: mpsc::Receiver<RaftCommand>,
    shutdown: watch::Receiver<bool>,
    tick_interval: Duration,
    pending: HashMap<u64, PendingProposal>,
    stats: Arc<RaftStats>,
    was_leader: bool,
}

impl RaftDriver {
    /// Assemble a driver around a recovered node. Returns the driver plus
    /// the handle its providers and status surfaces talk through.
    pub fn new(
        node: RaftNode,
        transport: Arc<dyn RaftTransport>,
        inbound: mpsc::Receiver<RaftEnvelope>,
        shutdown: watch::Receiver<bool>,
        tick_interval: Duration,
        stats: Arc<RaftStats>,
    ) -> (Self, RaftHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let driver = Self {
            node,
            transport,
            inbound,
            commands: rx,
            shutdown,
            tick_interval,
            pending: HashMap::new(),
            stats,
            was_leader: false,
        };
        (driver, RaftHandle { commands: tx })
    }

    /// Run until shutdown. Consumes the driver; spawn this on the runtime.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        loop {
            let step = tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let elapsed = now - last_tick;
                    last_tick = now;
                    self.node.tick(elapsed)
                }
                envelope = self.inbound.recv() => match envelope {
                    Some(RaftEnvelope { from, message }) => self.node.step(from, message),
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(cmd) => {
                        self.handle_command(cmd).await;
                        Ok(Vec::new())
                    }
                    None => break,
                },
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                    Ok(Vec::new())
                }
            };

            match step {
                Ok(outbound) => self.dispatch(outbound).await,
                Err(err) => {
                    // A log write failure leaves the node unable to promise
                    // anything; stop rather than answer from memory.
                    tracing::error!(%err, "consensus log failure, stopping driver");
                    self.fail_pending("consensus storage failure");
                    return;
                }
            }
            self.route_applied();
            self.track_leadership();
        }

        tracing::info!(node = %self.node.id(), "consensus driver stopped");
        self.fail_pending("consensus driver stopped");
    }

    async fn handle_command(&mut self, command: RaftCommand) {
        match command {
            RaftCommand::Propose { batch, reply } => match self.node.propose(batch) {
                Ok((index, term, outbound)) => {
                    self.stats.record_proposal();
                    self.pending.insert(index, PendingProposal { term, reply });
                    self.dispatch(outbound).await;
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            RaftCommand::Query { state_refs, reply } => {
                let result = if self.node.role() == Role::Leader {
                    Ok(state_refs
                        .iter()
                        .filter_map(|r| self.node.commit_map().holder_of(r).map(|tx| (*r, tx)))
                        .collect())
                } else {
                    Err(NotaryError::NotLeader {
                        hint: self.node.leader_hint().filter(|h| *h != self.node.id()),
                    })
                };
                let _ = reply.send(result);
            }
            RaftCommand::Status { reply } => {
                let _ = reply.send(RaftStatus {
                    id: self.node.id(),
                    role: self.node.role(),
                    term: self.node.term(),
                    leader_hint: self.node.leader_hint(),
                    commit_index: self.node.commit_index(),
                    last_index: self.node.last_index(),
                });
            }
        }
    }

    async fn dispatch(&self, outbound: Vec<Outbound>) {
        let from = self.node.id();
        for Outbound { to, message } in outbound {
            self.transport
                .send(to, RaftEnvelope { from, message })
                .await;
        }
    }

    fn route_applied(&mut self) {
        for outcome in self.node.take_applied() {
            self.stats.record_applied();
            if matches!(outcome.result, ApplyResult::Conflict(_)) {
                self.stats.record_apply_conflict();
            }
            let Some(pending) = self.pending.remove(&outcome.index) else {
                continue;
            };
            if pending.term != outcome.term {
                // Our entry was overwritten by another leader's; the
                // outcome of the original proposal is unknown.
                self.stats.record_superseded();
                let _ = pending.reply.send(Err(NotaryError::ConsensusUnavailable {
                    reason: "proposal superseded by a new leader".into(),
                }));
                continue;
            }
            let result = match outcome.result {
                ApplyResult::Committed | ApplyResult::Idempotent | ApplyResult::Barrier => Ok(()),
                ApplyResult::Conflict(report) => Err(NotaryError::Conflict(report)),
            };
            let _ = pending.reply.send(result);
        }
    }

    fn track_leadership(&mut self) {
        let is_leader = self.node.role() == Role::Leader;
        if self.was_leader && !is_leader {
            self.stats.record_step_down();
            self.fail_pending("leadership lost before commit");
        }
        if !self.was_leader && is_leader {
            self.stats.record_election_won();
        }
        self.was_leader = is_leader;
    }

    fn fail_pending(&mut self, reason: &str) {
        for (_, pending) in self.pending.drain() {
            self.stats.record_superseded();
            let _ = pending.reply.send(Err(NotaryError::ConsensusUnavailable {
                reason: reason.into(),
            }));
        }
    }
}

/// Uniqueness provider backed by the replicated commit log.
pub struct ReplicatedUniquenessProvider {
    commands: mpsc::Sender<RaftCommand>,
    commit_deadline: Duration,
    stats: CommitStats,
}

impl ReplicatedUniquenessProvider {
    /// Build a provider over a running driver's handle.
    pub fn new(handle: &RaftHandle, commit_deadline: Duration) -> Self {
        Self {
            commands: handle.commands.clone(),
            commit_deadline,
            stats: CommitStats::new(),
        }
    }

    /// Commit statistics.
    pub fn stats(&self) -> &CommitStats {
        &self.stats
    }

    async fn submit(&self, command: RaftCommand) -> NotaryResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NotaryError::ConsensusUnavailable {
                reason: "consensus driver stopped".into(),
            })
    }
}

#[async_trait]
impl UniquenessProvider for ReplicatedUniquenessProvider {
    async fn commit(
        &self,
        state_refs: &[StateRef],
        tx_id: TxId,
        caller: &Party,
    ) -> NotaryResult<()> {
        if state_refs.is_empty() {
            return Err(NotaryError::malformed("empty input state ref set"));
        }

        let (reply, rx) = oneshot::channel();
        self.submit(RaftCommand::Propose {
            batch: EntryBatch {
                tx_id,
                state_refs: state_refs.to_vec(),
                requested_by: caller.name.clone(),
            },
            reply,
        })
        .await?;

        let outcome = match tokio::time::timeout(self.commit_deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NotaryError::ConsensusUnavailable {
                reason: "consensus driver stopped".into(),
            }),
            Err(_) => Err(NotaryError::Timeout {
                operation: "replicated commit".into(),
            }),
        };

        match &outcome {
            Ok(()) => {
                self.stats.record_committed(state_refs.len());
                tracing::debug!(tx = %tx_id, refs = state_refs.len(), caller = %caller, "batch committed by cluster");
            }
            Err(NotaryError::Conflict(report)) => {
                self.stats.record_conflict();
                tracing::info!(tx = %tx_id, caller = %caller, conflicts = report.len(), "commit rejected by cluster");
            }
            Err(err) => {
                tracing::debug!(tx = %tx_id, %err, "replicated commit unresolved");
            }
        }
        outcome
    }

    async fn query(&self, state_refs: &[StateRef]) -> NotaryResult<Vec<(StateRef, TxId)>> {
        let (reply, rx) = oneshot::channel();
        self.submit(RaftCommand::Query {
            state_refs: state_refs.to_vec(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| NotaryError::ConsensusUnavailable {
            reason: "consensus driver stopped".into(),
        })?
    }
}
