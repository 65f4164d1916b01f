//! Deterministic election and replication state machine.
//!
//! [`RaftNode`] owns the durable log and the commit map but performs no I/O
//! other than log writes: time arrives through [`RaftNode::tick`], peer
//! messages through [`RaftNode::step`], and both return the messages to
//! send. The async driver in [`crate::raft::provider`] wires those to real
//! timers and sockets; tests drive the same core with synthetic time and an
//! in-memory message queue.

use crate::core::error::{NotaryError, NotaryResult};
use crate::raft::apply::{ApplyOutcome, CommitMap};
use crate::raft::log::{EntryBatch, LogEntry, RaftLog};
use crate::raft::rpc::{Outbound, RaftMessage};
use crate::raft::state::{Membership, NodeId, Role};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Entries per AppendEntries message; a lagging follower catches up over
/// several rounds.
const MAX_APPEND_ENTRIES: usize = 64;

/// Protocol timer configuration.
#[derive(Debug, Clone, Copy)]
pub struct RaftTimings {
    /// Lower bound of the randomized election timeout.
    pub election_timeout_min: Duration,

    /// Upper bound of the randomized election timeout.
    pub election_timeout_max: Duration,

    /// Leader heartbeat period; must be well below the election minimum.
    pub heartbeat_interval: Duration,
}

/// The per-node consensus core.
pub struct RaftNode {
    id: NodeId,
    membership: Membership,
    timings: RaftTimings,
    log: RaftLog,
    map: CommitMap,
    role: Role,
    leader_hint: Option<NodeId>,
    commit_index: u64,
    votes: BTreeSet<NodeId>,
    next_index: BTreeMap<NodeId, u64>,
    match_index: BTreeMap<NodeId, u64>,
    since_contact: Duration,
    since_broadcast: Duration,
    election_timeout: Duration,
    applied: Vec<ApplyOutcome>,
    rng: SmallRng,
}

impl RaftNode {
    /// Open the durable log in `data_dir` and recover: committed entries
    /// are re-applied to rebuild the commit map, then the node starts as a
    /// follower.
    pub fn open<P: AsRef<Path>>(
        id: NodeId,
        membership: Membership,
        timings: RaftTimings,
        data_dir: P,
    ) -> NotaryResult<Self> {
        let log = RaftLog::open(data_dir)?;
        let commit_index = log.commit_index();
        let mut node = Self {
            id,
            membership,
            timings,
            log,
            map: CommitMap::new(),
            role: Role::Follower,
            leader_hint: None,
            commit_index,
            votes: BTreeSet::new(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            since_contact: Duration::ZERO,
            since_broadcast: Duration::ZERO,
            election_timeout: Duration::ZERO,
            applied: Vec::new(),
            rng: SmallRng::from_entropy(),
        };
        node.reroll_election_timeout();
        for index in 1..=commit_index {
            let entry = node
                .log
                .get(index)
                .cloned()
                .ok_or_else(|| NotaryError::internal("committed entry missing during recovery"))?;
            node.map.apply(&entry);
        }
        // Recovery outcomes have no waiting proposers.
        node.applied.clear();
        tracing::info!(
            node = %id,
            term = node.log.hard_state().term,
            last_index = node.log.last_index(),
            applied = commit_index,
            "consensus node recovered"
        );
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current term.
    pub fn term(&self) -> u64 {
        self.log.hard_state().term
    }

    /// Last-known leader, if any.
    pub fn leader_hint(&self) -> Option<NodeId> {
        self.leader_hint
    }

    /// Highest committed index.
    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    /// Index of the last log entry.
    pub fn last_index(&self) -> u64 {
        self.log.last_index()
    }

    /// The applied commit map.
    pub fn commit_map(&self) -> &CommitMap {
        &self.map
    }

    /// Drain outcomes of entries applied since the last call.
    pub fn take_applied(&mut self) -> Vec<ApplyOutcome> {
        std::mem::take(&mut self.applied)
    }

    // ------------------------------------------------------------------
    // Client proposals
    // ------------------------------------------------------------------

    /// Propose a commit batch. Leader only.
    ///
    /// Pre-screens against the applied state so a commit that would surely
    /// conflict fails without consuming a log slot; the apply step remains
    /// authoritative for everything appended. Returns the entry's
    /// `(index, term)` for outcome tracking plus the replication messages
    /// to send.
    pub fn propose(&mut self, batch: EntryBatch) -> NotaryResult<(u64, u64, Vec<Outbound>)> {
        if self.role != Role::Leader {
            return Err(NotaryError::NotLeader {
                hint: self.leader_hint.filter(|h| *h != self.id),
            });
        }
        if let Some(report) = self.map.screen(&batch.state_refs, batch.tx_id) {
            return Err(NotaryError::Conflict(report));
        }

        let term = self.term();
        let index = self.log.last_index() + 1;
        self.log.append(LogEntry {
            index,
            term,
            batch: Some(batch),
        })?;

        let mut out = Vec::new();
        for peer in self.peer_list() {
            out.push(self.append_for(peer));
        }
        self.since_broadcast = Duration::ZERO;
        self.maybe_advance_commit()?;
        Ok((index, term, out))
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Advance the node's timers by `elapsed`.
    ///
    /// A follower or candidate whose election timeout expires starts a new
    /// election; a leader whose heartbeat interval expires broadcasts.
    pub fn tick(&mut self, elapsed: Duration) -> NotaryResult<Vec<Outbound>> {
        match self.role {
            Role::Leader => {
                self.since_broadcast += elapsed;
                if self.since_broadcast >= self.timings.heartbeat_interval {
                    self.since_broadcast = Duration::ZERO;
                    return Ok(self.broadcast_append());
                }
                Ok(Vec::new())
            }
            Role::Follower | Role::Candidate => {
                self.since_contact += elapsed;
                if self.since_contact >= self.election_timeout {
                    return self.start_election();
                }
                Ok(Vec::new())
            }
        }
    }

    // ------------------------------------------------------------------
    // Peer messages
    // ------------------------------------------------------------------

    /// Handle one message from `from`.
    pub fn step(&mut self, from: NodeId, msg: RaftMessage) -> NotaryResult<Vec<Outbound>> {
        if !self.membership.contains(from) {
            tracing::warn!(node = %self.id, %from, "message from non-member dropped");
            return Ok(Vec::new());
        }
        if msg.term() > self.term() {
            self.become_follower(msg.term(), None)?;
        }

        match msg {
            RaftMessage::RequestVote {
                term,
                candidate,
                last_log_index,
                last_log_term,
            } => self.on_request_vote(term, candidate, last_log_index, last_log_term),
            RaftMessage::RequestVoteReply { term, granted } => {
                self.on_vote_reply(from, term, granted)
            }
            RaftMessage::AppendEntries {
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => self.on_append_entries(
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            ),
            RaftMessage::AppendEntriesReply {
                term,
                success,
                match_index,
            } => self.on_append_reply(from, term, success, match_index),
        }
    }

    fn on_request_vote(
        &mut self,
        term: u64,
        candidate: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    ) -> NotaryResult<Vec<Outbound>> {
        let reply = |granted, current| {
            vec![Outbound::new(
                candidate,
                RaftMessage::RequestVoteReply {
                    term: current,
                    granted,
                },
            )]
        };

        if term < self.term() {
            return Ok(reply(false, self.term()));
        }

        let hs = self.log.hard_state();
        let vote_free = hs.voted_for.is_none() || hs.voted_for == Some(candidate);
        // Grant only to a candidate whose log is at least as up to date.
        let up_to_date = last_log_term > self.log.last_term()
            || (last_log_term == self.log.last_term() && last_log_index >= self.log.last_index());

        if vote_free && up_to_date {
            self.log.save_hard_state(term, Some(candidate))?;
            self.reset_election_timer();
            tracing::debug!(node = %self.id, %candidate, term, "vote granted");
            Ok(reply(true, term))
        } else {
            tracing::debug!(
                node = %self.id,
                %candidate,
                term,
                vote_free,
                up_to_date,
                "vote denied"
            );
            Ok(reply(false, self.term()))
        }
    }

    fn on_vote_reply(
        &mut self,
        from: NodeId,
        term: u64,
        granted: bool,
    ) -> NotaryResult<Vec<Outbound>> {
        if self.role != Role::Candidate || term != self.term() || !granted {
            return Ok(Vec::new());
        }
        self.votes.insert(from);
        if self.votes.len() >= self.membership.majority() {
            return self.become_leader();
        }
        Ok(Vec::new())
    }

    fn on_append_entries(
        &mut self,
        term: u64,
        leader: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> NotaryResult<Vec<Outbound>> {
        if term < self.term() {
            return Ok(vec![Outbound::new(
                leader,
                RaftMessage::AppendEntriesReply {
                    term: self.term(),
                    success: false,
                    match_index: 0,
                },
            )]);
        }

        // Valid leader for the current term: yield and reset the timer.
        if self.role != Role::Follower {
            self.become_follower(term, Some(leader))?;
        }
        self.leader_hint = Some(leader);
        self.reset_election_timer();

        if self.log.term_of(prev_log_index) != Some(prev_log_term) {
            // Log gap or divergence at prev; hint where ours ends so the
            // leader backs off quickly.
            let hint = self.log.last_index().min(prev_log_index.saturating_sub(1));
            return Ok(vec![Outbound::new(
                leader,
                RaftMessage::AppendEntriesReply {
                    term: self.term(),
                    success: false,
                    match_index: hint,
                },
            )]);
        }

        for entry in entries.iter() {
            match self.log.term_of(entry.index) {
                Some(existing) if existing == entry.term => {}
                Some(_) => {
                    // Divergent suffix loses to the leader's log.
                    self.log.truncate_from(entry.index)?;
                    self.log.append(entry.clone())?;
                }
                None => self.log.append(entry.clone())?,
            }
        }

        let matched = prev_log_index + entries.len() as u64;
        let new_commit = leader_commit.min(matched);
        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.apply_committed()?;
        }

        Ok(vec![Outbound::new(
            leader,
            RaftMessage::AppendEntriesReply {
                term: self.term(),
                success: true,
                match_index: matched,
            },
        )])
    }

    fn on_append_reply(
        &mut self,
        from: NodeId,
        term: u64,
        success: bool,
        match_index: u64,
    ) -> NotaryResult<Vec<Outbound>> {
        if self.role != Role::Leader || term != self.term() {
            return Ok(Vec::new());
        }

        if success {
            let known = self.match_index.entry(from).or_insert(0);
            *known = (*known).max(match_index);
            self.next_index.insert(from, match_index + 1);
            self.maybe_advance_commit()?;
            if self.next_index[&from] <= self.log.last_index() {
                return Ok(vec![self.append_for(from)]);
            }
            Ok(Vec::new())
        } else {
            let next = self.next_index.entry(from).or_insert(1);
            *next = (*next - 1).clamp(1, match_index + 1);
            Ok(vec![self.append_for(from)])
        }
    }

    // ------------------------------------------------------------------
    // Role transitions
    // ------------------------------------------------------------------

    fn become_follower(&mut self, term: u64, leader: Option<NodeId>) -> NotaryResult<()> {
        if term > self.term() {
            self.log.save_hard_state(term, None)?;
        }
        if self.role != Role::Follower {
            tracing::info!(node = %self.id, term, "stepping down to follower");
        }
        self.role = Role::Follower;
        self.leader_hint = leader;
        self.votes.clear();
        self.reset_election_timer();
        Ok(())
    }

    fn start_election(&mut self) -> NotaryResult<Vec<Outbound>> {
        let term = self.term() + 1;
        self.log.save_hard_state(term, Some(self.id))?;
        self.role = Role::Candidate;
        self.leader_hint = None;
        self.votes.clear();
        self.votes.insert(self.id);
        self.reset_election_timer();
        tracing::info!(node = %self.id, term, "election started");

        if self.votes.len() >= self.membership.majority() {
            return self.become_leader();
        }

        let last_log_index = self.log.last_index();
        let last_log_term = self.log.last_term();
        Ok(self
            .peer_list()
            .into_iter()
            .map(|peer| {
                Outbound::new(
                    peer,
                    RaftMessage::RequestVote {
                        term,
                        candidate: self.id,
                        last_log_index,
                        last_log_term,
                    },
                )
            })
            .collect())
    }

    fn become_leader(&mut self) -> NotaryResult<Vec<Outbound>> {
        tracing::info!(node = %self.id, term = self.term(), "leadership won");
        self.role = Role::Leader;
        self.leader_hint = Some(self.id);
        let next = self.log.last_index() + 1;
        for peer in self.peer_list() {
            self.next_index.insert(peer, next);
            self.match_index.insert(peer, 0);
        }

        // Barrier entry: entries from earlier terms only commit once an
        // entry of the current term does.
        let term = self.term();
        self.log.append(LogEntry {
            index: next,
            term,
            batch: None,
        })?;
        self.since_broadcast = Duration::ZERO;
        self.maybe_advance_commit()?;
        Ok(self.broadcast_append())
    }

    // ------------------------------------------------------------------
    // Replication plumbing
    // ------------------------------------------------------------------

    fn peer_list(&self) -> Vec<NodeId> {
        self.membership.peers_of(self.id).collect()
    }

    fn append_for(&self, peer: NodeId) -> Outbound {
        let next = self.next_index.get(&peer).copied().unwrap_or(1).max(1);
        let prev_log_index = next - 1;
        let prev_log_term = self.log.term_of(prev_log_index).unwrap_or(0);
        Outbound::new(
            peer,
            RaftMessage::AppendEntries {
                term: self.term(),
                leader: self.id,
                prev_log_index,
                prev_log_term,
                entries: self.log.entries_from(next, MAX_APPEND_ENTRIES),
                leader_commit: self.commit_index,
            },
        )
    }

    fn broadcast_append(&self) -> Vec<Outbound> {
        self.peer_list()
            .into_iter()
            .map(|peer| self.append_for(peer))
            .collect()
    }

    fn maybe_advance_commit(&mut self) -> NotaryResult<()> {
        let mut advanced = self.commit_index;
        for n in (self.commit_index + 1)..=self.log.last_index() {
            // Only entries of the current term commit by counting.
            if self.log.term_of(n) != Some(self.term()) {
                continue;
            }
            let stored = 1 + self
                .match_index
                .values()
                .filter(|m| **m >= n)
                .count();
            if stored >= self.membership.majority() {
                advanced = n;
            }
        }
        if advanced > self.commit_index {
            self.commit_index = advanced;
            self.apply_committed()?;
        }
        Ok(())
    }

    fn apply_committed(&mut self) -> NotaryResult<()> {
        while self.map.last_applied() < self.commit_index {
            let index = self.map.last_applied() + 1;
            let entry = self
                .log
                .get(index)
                .cloned()
                .ok_or_else(|| NotaryError::internal("committed entry missing from log"))?;
            let outcome = self.map.apply(&entry);
            self.applied.push(outcome);
        }
        self.log.save_commit_index(self.commit_index)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn reset_election_timer(&mut self) {
        self.since_contact = Duration::ZERO;
        self.reroll_election_timeout();
    }

    fn reroll_election_timeout(&mut self) {
        let min = self.timings.election_timeout_min.as_millis() as u64;
        let max = self.timings.election_timeout_max.as_millis() as u64;
        let ms = if max > min {
            self.rng.gen_range(min..=max)
        } else {
            min
        };
        self.election_timeout = Duration::from_millis(ms);
    }
}

impl std::fmt::Debug for RaftNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftNode")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("term", &self.term())
            .field("commit_index", &self.commit_index)
            .field("last_index", &self.log.last_index())
            .finish()
    }
}
