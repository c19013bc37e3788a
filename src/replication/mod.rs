//! Replication Group (C1, spec.md §4.1): one Raft-backed replicated log per
//! (topic, partition-id).
//!
//! A `ReplicationGroupState` is never shared across threads — it is owned
//! exclusively by the poll loop in `crate::transport`, which is the only
//! thing that ever calls `append`/`receive`/`timer_tick` on the underlying
//! `raft::node::Node` (spec.md §9, "transport sockets owned exclusively by
//! the poll loop"). RPC-handler threads reach a group only indirectly, via
//! `crate::transport::TransportHandle`.

pub mod log_op;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use rand::rngs::OsRng;
use raft::log::memory::InMemoryLog;
use raft::message::SendableMessage;
use raft::node::{Config, Node};

use crate::error::BrokerError;
use log_op::LogOp;

/// Identifies one Replication Group: the (topic, partition-id) pair named
/// in spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub topic: String,
    pub partition: String,
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

type RaftNode = Node<InMemoryLog, OsRng, String>;

/// Default consensus tuning, matching the teacher's `cluster::peer::CONFIG`.
pub fn default_config() -> Config {
    Config {
        election_timeout_ticks: 10,
        heartbeat_interval_ticks: 5,
        replication_chunk_size: 65536,
    }
}

enum Waiter {
    Append(Sender<Result<(), BrokerError>>),
    Drain(Sender<Result<Vec<String>, BrokerError>>),
}

impl Waiter {
    fn resolve_timeout(self) {
        match self {
            Waiter::Append(reply_tx) => {
                let _ = reply_tx.send(Err(BrokerError::ConsensusTimeout));
            }
            Waiter::Drain(reply_tx) => {
                let _ = reply_tx.send(Err(BrokerError::ConsensusTimeout));
            }
        }
    }
}

// A leadership change can truncate an in-flight entry out of the log via
// `cancel_from` before it commits — a normal occurrence during contested
// elections, not a corner case. That entry's `LogOp` never reaches
// `take_committed`, so its waiter would otherwise sit in `waiters` forever.
// This bounds how long a caller can be left hanging.
const WAITER_TIMEOUT: Duration = Duration::from_secs(5);

/// The replicated state backing one (topic, partition) pair: the consensus
/// node itself, plus the local pending-queries queue (spec.md §3's "local
/// pending-queries queue contains only entries committed and not yet
/// drained").
pub struct ReplicationGroupState {
    node: RaftNode,
    pending: VecDeque<String>,
    waiters: HashMap<u64, (Waiter, Instant)>,
    next_nonce: u64,
}

impl ReplicationGroupState {
    pub fn new(self_addr: String, peers: BTreeSet<String>) -> Self {
        ReplicationGroupState {
            node: Node::new(
                self_addr,
                peers,
                InMemoryLog::new_unbounded(),
                OsRng::default(),
                default_config(),
            ),
            pending: VecDeque::new(),
            waiters: HashMap::new(),
            next_nonce: 0,
        }
    }

    fn fresh_nonce(&mut self) -> u64 {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        nonce
    }

    /// Submits `record` to consensus (C1's `append`). Registers a waiter for
    /// the commit *before* handing the entry to the node, so a single-node
    /// group — which commits synchronously inside `Node::append` — always
    /// finds its waiter already in place when `drain_committed` runs right
    /// after.
    pub fn submit_append(
        &mut self,
        record: String,
        reply_tx: Sender<Result<(), BrokerError>>,
    ) -> Vec<SendableMessage<String>> {
        let nonce = self.fresh_nonce();
        self.waiters
            .insert(nonce, (Waiter::Append(reply_tx.clone()), Instant::now()));

        let op = LogOp::Append { nonce, record };
        match self.node.append(op.encode()) {
            Ok(messages) => {
                let messages: Vec<_> = messages.collect();
                self.drain_committed();
                messages
            }
            Err(err) => {
                self.waiters.remove(&nonce);
                let _ = reply_tx.send(Err(BrokerError::from(err)));
                Vec::new()
            }
        }
    }

    /// Submits a `Drain(n)` consensus op for the `n` records currently
    /// visible at the front of the pending-queries queue (resolving
    /// spec.md's "drain is itself replicated" via
    /// `original_source/src/broker/broker.py`'s `remove_queries(len(temp),
    /// sync=True)`).
    pub fn submit_drain(
        &mut self,
        reply_tx: Sender<Result<Vec<String>, BrokerError>>,
    ) -> Vec<SendableMessage<String>> {
        let count = self.pending.len() as u64;
        if count == 0 {
            let _ = reply_tx.send(Ok(Vec::new()));
            return Vec::new();
        }

        let nonce = self.fresh_nonce();
        self.waiters
            .insert(nonce, (Waiter::Drain(reply_tx.clone()), Instant::now()));

        let op = LogOp::Drain { nonce, count };
        match self.node.append(op.encode()) {
            Ok(messages) => {
                let messages: Vec<_> = messages.collect();
                self.drain_committed();
                messages
            }
            Err(err) => {
                self.waiters.remove(&nonce);
                let _ = reply_tx.send(Err(BrokerError::from(err)));
                Vec::new()
            }
        }
    }

    pub fn on_receive(&mut self, message: raft::message::Message, from: String) -> Vec<SendableMessage<String>> {
        let messages: Vec<_> = self.node.receive(message, from).collect();
        self.drain_committed();
        self.reap_stale_waiters();
        messages
    }

    pub fn on_tick(&mut self) -> Vec<SendableMessage<String>> {
        let messages: Vec<_> = self.node.timer_tick().collect();
        self.drain_committed();
        self.reap_stale_waiters();
        messages
    }

    /// Resolves any waiter whose entry has been outstanding longer than
    /// `WAITER_TIMEOUT` with `ConsensusTimeout`, covering the case where the
    /// underlying log entry was cancelled by a leadership change rather than
    /// committed or ever resolved by `drain_committed`.
    fn reap_stale_waiters(&mut self) {
        let now = Instant::now();
        let stale: Vec<u64> = self
            .waiters
            .iter()
            .filter(|(_, (_, submitted))| now.duration_since(*submitted) >= WAITER_TIMEOUT)
            .map(|(nonce, _)| *nonce)
            .collect();
        for nonce in stale {
            if let Some((waiter, _)) = self.waiters.remove(&nonce) {
                waiter.resolve_timeout();
            }
        }
    }

    /// Applies every newly-committed `LogOp` to the local pending-queries
    /// queue, in commit order, and resolves any waiter whose nonce matches.
    fn drain_committed(&mut self) {
        let committed: Vec<_> = self.node.take_committed().collect();
        for entry in committed {
            let op = match LogOp::decode(&entry.data) {
                Ok(op) => op,
                Err(err) => {
                    log::warn!("dropping unparseable committed log entry: {}", err);
                    continue;
                }
            };

            match op {
                LogOp::Append { nonce, record } => {
                    self.pending.push_back(record);
                    if let Some((Waiter::Append(reply_tx), _)) = self.waiters.remove(&nonce) {
                        let _ = reply_tx.send(Ok(()));
                    }
                }
                LogOp::Drain { nonce, count } => {
                    let drained: Vec<String> = self
                        .pending
                        .drain(..(count as usize).min(self.pending.len()))
                        .collect();
                    if let Some((Waiter::Drain(reply_tx), _)) = self.waiters.remove(&nonce) {
                        let _ = reply_tx.send(Ok(drained));
                    }
                }
            }
        }
    }

    pub fn node_id(&self) -> &String {
        self.node.node_id()
    }

    pub fn peers(&self) -> &BTreeSet<String> {
        self.node.peers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_group_commits_append_synchronously() {
        let mut group = ReplicationGroupState::new("broker-1".to_string(), BTreeSet::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        group.submit_append("INSERT INTO topic(...)".to_string(), tx);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn drain_returns_exactly_the_records_visible_at_call_time() {
        let mut group = ReplicationGroupState::new("broker-1".to_string(), BTreeSet::new());

        let (tx, rx) = crossbeam_channel::unbounded();
        group.submit_append("a".to_string(), tx.clone());
        rx.recv().unwrap().unwrap();
        group.submit_append("b".to_string(), tx);
        rx.recv().unwrap().unwrap();

        let (drain_tx, drain_rx) = crossbeam_channel::unbounded();
        group.submit_drain(drain_tx);
        let drained = drain_rx.recv().unwrap().unwrap();
        assert_eq!(drained, vec!["a".to_string(), "b".to_string()]);

        let (drain_tx2, drain_rx2) = crossbeam_channel::unbounded();
        group.submit_drain(drain_tx2);
        assert_eq!(drain_rx2.recv().unwrap().unwrap(), Vec::<String>::new());
    }
}
