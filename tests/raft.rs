//! Consensus tests over the deterministic node core.
//!
//! These drive [`RaftNode`] directly with synthetic time and an in-memory
//! message queue: no sockets, no timers, no sleeps.

mod common;

use common::{alice, refs_of, tx};
use notarius::core::error::NotaryError;
use notarius::ledger::{StateRef, TxId};
use notarius::net::transport::LocalTransport;
use notarius::ops::telemetry::RaftStats;
use notarius::raft::apply::ApplyResult;
use notarius::raft::log::EntryBatch;
use notarius::raft::node::{RaftNode, RaftTimings};
use notarius::raft::provider::{RaftDriver, RaftHandle, RaftStatus, ReplicatedUniquenessProvider};
use notarius::raft::rpc::{Outbound, RaftEnvelope, RaftMessage};
use notarius::raft::state::{Membership, NodeId, Role};
use notarius::uniqueness::UniquenessProvider;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

/// In-memory cluster harness with explicit message delivery.
struct Cluster {
    dirs: BTreeMap<NodeId, TempDir>,
    nodes: BTreeMap<NodeId, RaftNode>,
    queue: VecDeque<(NodeId, Outbound)>,
    partitioned: BTreeSet<NodeId>,
}

/// Distinct fixed election timeouts make the first timeout deterministic:
/// node 1 fires at 100ms, node 2 at 150ms, node 3 at 200ms.
fn timings_for(id: u64) -> RaftTimings {
    let timeout = Duration::from_millis(100 + 50 * (id - 1));
    RaftTimings {
        election_timeout_min: timeout,
        election_timeout_max: timeout,
        heartbeat_interval: Duration::from_millis(30),
    }
}

impl Cluster {
    fn new(size: u64) -> Self {
        let members: Vec<NodeId> = (1..=size).map(NodeId).collect();
        let membership = Membership::new(members.clone());
        let mut dirs = BTreeMap::new();
        let mut nodes = BTreeMap::new();
        for id in members {
            let dir = TempDir::new().unwrap();
            let node =
                RaftNode::open(id, membership.clone(), timings_for(id.0), dir.path()).unwrap();
            dirs.insert(id, dir);
            nodes.insert(id, node);
        }
        Self {
            dirs,
            nodes,
            queue: VecDeque::new(),
            partitioned: BTreeSet::new(),
        }
    }

    fn node(&mut self, id: u64) -> &mut RaftNode {
        self.nodes.get_mut(&NodeId(id)).unwrap()
    }

    fn tick(&mut self, ms: u64) {
        let elapsed = Duration::from_millis(ms);
        for (id, node) in self.nodes.iter_mut() {
            if self.partitioned.contains(id) {
                continue;
            }
            for out in node.tick(elapsed).unwrap() {
                self.queue.push_back((*id, out));
            }
        }
    }

    fn deliver_all(&mut self) {
        let mut budget = 10_000;
        while let Some((from, Outbound { to, message })) = self.queue.pop_front() {
            assert!(budget > 0, "message storm: delivery did not converge");
            budget -= 1;
            if self.partitioned.contains(&from) || self.partitioned.contains(&to) {
                continue;
            }
            let target = self.nodes.get_mut(&to).unwrap();
            for out in target.step(from, message).unwrap() {
                self.queue.push_back((to, out));
            }
        }
    }

    /// A few heartbeat rounds, enough to propagate the commit index.
    fn settle(&mut self) {
        for _ in 0..3 {
            self.tick(30);
            self.deliver_all();
        }
    }

    fn elect(&mut self) -> NodeId {
        self.tick(100);
        self.deliver_all();
        self.leader().expect("no leader after election round")
    }

    /// The leader among reachable nodes. A partitioned old leader does not
    /// step down on its own and must not be reported here.
    fn leader(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(id, n)| !self.partitioned.contains(id) && n.role() == Role::Leader)
            .map(|(id, _)| *id)
    }

    fn propose(&mut self, on: NodeId, state_refs: Vec<StateRef>, tx_id: TxId) -> (u64, u64) {
        let node = self.nodes.get_mut(&on).unwrap();
        let (index, term, out) = node
            .propose(EntryBatch {
                tx_id,
                state_refs,
                requested_by: "alice".into(),
            })
            .unwrap();
        for o in out {
            self.queue.push_back((on, o));
        }
        (index, term)
    }
}

// ============================================================================
// Election
// ============================================================================

#[test]
fn first_timeout_wins_the_election() {
    let mut c = Cluster::new(3);
    let leader = c.elect();
    assert_eq!(leader, NodeId(1));

    let follower_count = c
        .nodes
        .values()
        .filter(|n| n.role() == Role::Follower)
        .count();
    assert_eq!(follower_count, 2);
    for node in c.nodes.values() {
        assert_eq!(node.leader_hint(), Some(leader));
        assert_eq!(node.term(), 1);
    }
}

#[test]
fn single_node_cluster_elects_itself() {
    let mut c = Cluster::new(1);
    let leader = c.elect();
    assert_eq!(leader, NodeId(1));
    // The barrier entry commits without any peer.
    assert_eq!(c.node(1).commit_index(), 1);
}

#[test]
fn heartbeats_suppress_new_elections() {
    let mut c = Cluster::new(3);
    c.elect();
    // Several full election-timeout periods with heartbeats flowing.
    for _ in 0..10 {
        c.tick(30);
        c.deliver_all();
    }
    assert_eq!(c.leader(), Some(NodeId(1)));
    assert_eq!(c.node(1).term(), 1);
}

// ============================================================================
// Replication and apply
// ============================================================================

#[test]
fn committed_batch_is_applied_on_every_node() {
    let mut c = Cluster::new(3);
    let leader = c.elect();
    let refs = refs_of(tx(1), 2);
    c.propose(leader, refs.clone(), tx(9));
    c.deliver_all();
    c.settle();

    let commit_index = c.node(1).commit_index();
    for id in 1..=3 {
        let node = c.node(id);
        assert_eq!(node.commit_index(), commit_index, "node {id} lags");
        for r in &refs {
            assert_eq!(node.commit_map().holder_of(r), Some(tx(9)), "node {id}");
        }
    }
}

#[test]
fn follower_refuses_proposals_with_a_hint() {
    let mut c = Cluster::new(3);
    let leader = c.elect();
    let err = c
        .node(2)
        .propose(EntryBatch {
            tx_id: tx(9),
            state_refs: refs_of(tx(1), 1),
            requested_by: "alice".into(),
        })
        .unwrap_err();
    let NotaryError::NotLeader { hint } = err else {
        panic!("expected NotLeader");
    };
    assert_eq!(hint, Some(leader));
}

#[test]
fn leader_screens_proposals_against_applied_state() {
    let mut c = Cluster::new(3);
    let leader = c.elect();
    let refs = refs_of(tx(1), 1);
    c.propose(leader, refs.clone(), tx(9));
    c.deliver_all();
    c.settle();

    let err = c
        .nodes
        .get_mut(&leader)
        .unwrap()
        .propose(EntryBatch {
            tx_id: tx(8),
            state_refs: refs,
            requested_by: "bob".into(),
        })
        .unwrap_err();
    assert!(matches!(err, NotaryError::Conflict(_)));
}

#[test]
fn apply_is_authoritative_for_races_past_the_screen() {
    let mut c = Cluster::new(3);
    let leader = c.elect();
    c.nodes.get_mut(&leader).unwrap().take_applied();
    let refs = refs_of(tx(1), 1);

    // Two competing batches enter the log before either is applied, so the
    // leader's screen sees neither.
    let (_, _) = c.propose(leader, refs.clone(), tx(9));
    let (loser_index, _) = c.propose(leader, refs.clone(), tx(8));
    c.deliver_all();
    c.settle();

    let node = c.nodes.get_mut(&leader).unwrap();
    assert_eq!(node.commit_map().holder_of(&refs[0]), Some(tx(9)));
    let outcomes = node.take_applied();
    let loser = outcomes
        .iter()
        .find(|o| o.index == loser_index)
        .expect("loser entry applied");
    let ApplyResult::Conflict(report) = &loser.result else {
        panic!("expected conflict outcome");
    };
    assert_eq!(report.winner_of(&refs[0]), Some(tx(9)));
}

#[test]
fn idempotent_batch_reapplies_cleanly() {
    let mut c = Cluster::new(3);
    let leader = c.elect();
    c.nodes.get_mut(&leader).unwrap().take_applied();
    let refs = refs_of(tx(1), 1);
    let (_, _) = c.propose(leader, refs.clone(), tx(9));
    let (second_index, _) = c.propose(leader, refs, tx(9));
    c.deliver_all();
    c.settle();

    let outcomes = c.nodes.get_mut(&leader).unwrap().take_applied();
    let second = outcomes.iter().find(|o| o.index == second_index).unwrap();
    assert_eq!(second.result, ApplyResult::Idempotent);
}

// ============================================================================
// Recovery
// ============================================================================

#[test]
fn restart_replays_committed_entries() {
    let dir = TempDir::new().unwrap();
    let membership = Membership::new(vec![NodeId(1)]);
    let refs = refs_of(tx(1), 2);
    {
        let mut node =
            RaftNode::open(NodeId(1), membership.clone(), timings_for(1), dir.path()).unwrap();
        node.tick(Duration::from_millis(100)).unwrap();
        assert_eq!(node.role(), Role::Leader);
        node.propose(EntryBatch {
            tx_id: tx(9),
            state_refs: refs.clone(),
            requested_by: "alice".into(),
        })
        .unwrap();
        assert_eq!(node.commit_map().holder_of(&refs[0]), Some(tx(9)));
    }

    let node = RaftNode::open(NodeId(1), membership, timings_for(1), dir.path()).unwrap();
    assert_eq!(node.role(), Role::Follower);
    // Hard state survives: the term won before the restart is still current.
    assert_eq!(node.term(), 1);
    assert_eq!(node.commit_map().holder_of(&refs[0]), Some(tx(9)));
    assert_eq!(node.commit_map().holder_of(&refs[1]), Some(tx(9)));
    assert_eq!(node.commit_index(), node.last_index());
}

// ============================================================================
// Leadership changes
// ============================================================================

#[test]
fn deposed_leader_discards_divergent_entries() {
    let mut c = Cluster::new(3);
    let old_leader = c.elect();
    assert_eq!(old_leader, NodeId(1));
    c.settle();

    // Partition the leader; its proposal reaches nobody.
    c.partitioned.insert(old_leader);
    let refs_a = refs_of(tx(1), 1);
    c.propose(old_leader, refs_a.clone(), tx(9));
    c.deliver_all();

    // Node 2 times out and wins the election among the remaining majority,
    // then commits its own batch.
    c.tick(150);
    c.deliver_all();
    let new_leader = c.leader().expect("no new leader");
    assert_eq!(new_leader, NodeId(2));
    assert!(c.node(2).term() > 1);
    let refs_b = refs_of(tx(2), 1);
    c.propose(new_leader, refs_b.clone(), tx(8));
    c.deliver_all();
    c.settle();

    // Heal the partition; the old leader steps down, truncates its
    // divergent suffix, and converges on the new leader's log.
    c.partitioned.clear();
    c.settle();

    let node1 = c.node(1);
    assert_eq!(node1.role(), Role::Follower);
    assert_eq!(node1.commit_map().holder_of(&refs_b[0]), Some(tx(8)));
    assert_eq!(node1.commit_map().holder_of(&refs_a[0]), None);
    for id in 1..=3 {
        assert_eq!(c.node(id).commit_map().holder_of(&refs_a[0]), None);
    }
}

#[test]
fn stale_term_vote_requests_are_denied() {
    let mut c = Cluster::new(3);
    c.elect();
    c.settle();
    let current_term = c.node(1).term();

    // A vote request from an older term is refused outright.
    let replies = c
        .node(3)
        .step(
            NodeId(2),
            notarius::raft::rpc::RaftMessage::RequestVote {
                term: 0,
                candidate: NodeId(2),
                last_log_index: 0,
                last_log_term: 0,
            },
        )
        .unwrap();
    assert_eq!(replies.len(), 1);
    let notarius::raft::rpc::RaftMessage::RequestVoteReply { term, granted } =
        replies[0].message.clone()
    else {
        panic!("expected vote reply");
    };
    assert!(!granted);
    assert_eq!(term, current_term);
}

// ============================================================================
// Driver and replicated provider
// ============================================================================

/// Running drivers wired through the in-process transport.
struct Drivers {
    _dirs: Vec<TempDir>,
    handles: BTreeMap<NodeId, RaftHandle>,
    providers: BTreeMap<NodeId, Arc<ReplicatedUniquenessProvider>>,
    inbounds: BTreeMap<NodeId, mpsc::Sender<RaftEnvelope>>,
    shutdowns: BTreeMap<NodeId, watch::Sender<bool>>,
}

/// Node 1 campaigns almost immediately; everyone else holds back long
/// enough that the test decides the outcome.
fn driver_timings(id: u64) -> RaftTimings {
    let timeout = if id == 1 {
        Duration::from_millis(40)
    } else {
        Duration::from_secs(5)
    };
    RaftTimings {
        election_timeout_min: timeout,
        election_timeout_max: timeout,
        heartbeat_interval: Duration::from_millis(20),
    }
}

/// Spawn a driver for every node in `live`; `members` fixes the membership,
/// so absent members count against the majority.
async fn start_drivers(members: &[u64], live: &[u64], commit_deadline: Duration) -> Drivers {
    let membership = Membership::new(members.iter().copied().map(NodeId).collect());
    let transport = Arc::new(LocalTransport::new());
    let mut fixture = Drivers {
        _dirs: Vec::new(),
        handles: BTreeMap::new(),
        providers: BTreeMap::new(),
        inbounds: BTreeMap::new(),
        shutdowns: BTreeMap::new(),
    };
    for &id in live {
        let id = NodeId(id);
        let dir = TempDir::new().unwrap();
        let node =
            RaftNode::open(id, membership.clone(), driver_timings(id.0), dir.path()).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        transport.register(id, inbound_tx.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (driver, handle) = RaftDriver::new(
            node,
            transport.clone(),
            inbound_rx,
            shutdown_rx,
            Duration::from_millis(10),
            Arc::new(RaftStats::new()),
        );
        tokio::spawn(driver.run());
        fixture.providers.insert(
            id,
            Arc::new(ReplicatedUniquenessProvider::new(&handle, commit_deadline)),
        );
        fixture.handles.insert(id, handle);
        fixture.inbounds.insert(id, inbound_tx);
        fixture.shutdowns.insert(id, shutdown_tx);
        fixture._dirs.push(dir);
    }
    fixture
}

async fn wait_until(handle: &RaftHandle, what: &str, pred: impl Fn(&RaftStatus) -> bool) {
    for _ in 0..300 {
        if let Some(status) = handle.status().await {
            if pred(&status) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn replicated_provider_commits_on_the_leader() {
    let fx = start_drivers(&[1], &[1], Duration::from_secs(1)).await;
    let leader = NodeId(1);
    wait_until(&fx.handles[&leader], "self-election", |s| {
        s.role == Role::Leader
    })
    .await;

    let provider = &fx.providers[&leader];
    let refs = refs_of(tx(1), 2);
    provider.commit(&refs, tx(9), &alice()).await.unwrap();
    // Identical resubmission commits again without complaint.
    provider.commit(&refs, tx(9), &alice()).await.unwrap();

    let err = provider.commit(&refs, tx(8), &alice()).await.unwrap_err();
    let NotaryError::Conflict(report) = err else {
        panic!("expected conflict");
    };
    assert_eq!(report.len(), 2);
    assert_eq!(report.winner_of(&refs[0]), Some(tx(9)));

    let held = provider.query(&refs).await.unwrap();
    assert_eq!(held.len(), 2);
    assert!(held.iter().all(|(_, holder)| *holder == tx(9)));
}

#[tokio::test]
async fn follower_provider_redirects_to_the_leader() {
    let fx = start_drivers(&[1, 2], &[1, 2], Duration::from_secs(1)).await;
    wait_until(&fx.handles[&NodeId(2)], "leader hint", |s| {
        s.role == Role::Follower && s.leader_hint == Some(NodeId(1))
    })
    .await;

    let provider = &fx.providers[&NodeId(2)];
    let err = provider
        .commit(&refs_of(tx(1), 1), tx(9), &alice())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let NotaryError::NotLeader { hint } = err else {
        panic!("expected NotLeader");
    };
    assert_eq!(hint, Some(NodeId(1)));

    let err = provider.query(&refs_of(tx(1), 1)).await.unwrap_err();
    assert!(matches!(err, NotaryError::NotLeader { .. }));
}

#[tokio::test]
async fn commit_without_a_majority_times_out_retryably() {
    let fx = start_drivers(&[1, 2, 3], &[1, 2], Duration::from_millis(200)).await;
    wait_until(&fx.handles[&NodeId(1)], "election", |s| {
        s.role == Role::Leader
    })
    .await;
    // The only follower goes away; proposals can no longer reach majority.
    fx.shutdowns[&NodeId(2)].send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = fx.providers[&NodeId(1)]
        .commit(&refs_of(tx(1), 1), tx(9), &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, NotaryError::Timeout { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn losing_leadership_fails_pending_commits_retryably() {
    let fx = start_drivers(&[1, 2, 3], &[1, 2], Duration::from_secs(2)).await;
    wait_until(&fx.handles[&NodeId(1)], "election", |s| {
        s.role == Role::Leader
    })
    .await;
    let term = fx.handles[&NodeId(1)].status().await.unwrap().term;
    fx.shutdowns[&NodeId(2)].send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // With no majority the proposal pends; it must not sit until the
    // deadline once leadership is lost.
    let provider = fx.providers[&NodeId(1)].clone();
    let refs = refs_of(tx(1), 1);
    let pending = tokio::spawn(async move { provider.commit(&refs, tx(9), &alice()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A vote request from a higher term forces the leader to step down;
    // the stranded proposal resolves retryably, never as a conflict.
    fx.inbounds[&NodeId(1)]
        .send(RaftEnvelope {
            from: NodeId(2),
            message: RaftMessage::RequestVote {
                term: term + 1,
                candidate: NodeId(2),
                last_log_index: 0,
                last_log_term: 0,
            },
        })
        .await
        .unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, NotaryError::ConsensusUnavailable { .. }));
    assert!(err.is_retryable());
    wait_until(&fx.handles[&NodeId(1)], "step down", |s| {
        s.role != Role::Leader
    })
    .await;
}
