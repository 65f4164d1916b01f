//! Inter-node RPC message types.
//!
//! Heartbeats are `AppendEntries` with an empty entry list; they reset
//! follower election timers and carry the leader's commit index.

use crate::raft::log::LogEntry;
use crate::raft::state::NodeId;
use serde::{Deserialize, Serialize};

/// A Raft protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    /// Candidate requesting a vote for `term`.
    RequestVote {
        term: u64,
        candidate: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    },

    /// Reply to a vote request.
    RequestVoteReply { term: u64, granted: bool },

    /// Leader replicating entries (or heartbeating when `entries` is empty).
    AppendEntries {
        term: u64,
        leader: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },

    /// Reply to a replication request. On failure, `match_index` is a hint
    /// for where the logs might agree, used to back off `next_index`.
    AppendEntriesReply {
        term: u64,
        success: bool,
        match_index: u64,
    },
}

impl RaftMessage {
    /// The term carried by the message.
    pub fn term(&self) -> u64 {
        match self {
            Self::RequestVote { term, .. }
            | Self::RequestVoteReply { term, .. }
            | Self::AppendEntries { term, .. }
            | Self::AppendEntriesReply { term, .. } => *term,
        }
    }

    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestVote { .. } => "request_vote",
            Self::RequestVoteReply { .. } => "request_vote_reply",
            Self::AppendEntries { entries, .. } if entries.is_empty() => "heartbeat",
            Self::AppendEntries { .. } => "append_entries",
            Self::AppendEntriesReply { .. } => "append_entries_reply",
        }
    }
}

/// A message addressed to a peer, produced by the node state machine.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Destination node.
    pub to: NodeId,

    /// The message to deliver.
    pub message: RaftMessage,
}

impl Outbound {
    /// Address `message` to `to`.
    pub fn new(to: NodeId, message: RaftMessage) -> Self {
        Self { to, message }
    }
}

/// Envelope framing a message with its sender, used on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftEnvelope {
    /// Sending node.
    pub from: NodeId,

    /// The carried message.
    pub message: RaftMessage,
}
