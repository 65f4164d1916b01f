//! Cluster roles, membership, and persisted hard state.

use serde::{Deserialize, Serialize};

/// Identifier of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Role of a node in the replication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Passive replica; accepts entries from the leader, votes in elections.
    Follower,
    /// Election in progress; requesting votes for a new term.
    Candidate,
    /// The elected leader; the only node accepting client commits.
    Leader,
}

impl Role {
    /// Whether this role accepts client commit calls.
    pub fn accepts_commits(&self) -> bool {
        matches!(self, Self::Leader)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Candidate => write!(f, "candidate"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// Term number and vote, persisted before any message referencing them is
/// sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardState {
    /// Latest term this node has seen.
    pub term: u64,

    /// Candidate voted for in `term`, if any. At most one vote per term.
    pub voted_for: Option<NodeId>,
}

/// Fixed cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Every voting member, including the local node.
    pub members: Vec<NodeId>,
}

impl Membership {
    /// Create a membership from a list of node ids.
    pub fn new(mut members: Vec<NodeId>) -> Self {
        members.sort_unstable();
        members.dedup();
        Self { members }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the membership is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Votes (or durable stores) required for a majority.
    pub fn majority(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    /// Every member except `id`.
    pub fn peers_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied().filter(move |m| *m != id)
    }
}
