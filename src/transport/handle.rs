//! The caller-facing surface of C2: a cheap, cloneable handle that lets
//! RPC-handler threads (C3, C5) reach a replication group without ever
//! touching the `raft::node::Node` directly, which lives exclusively on the
//! poll-loop thread (spec.md §9).

use std::collections::BTreeSet;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};

use crate::error::BrokerError;
use crate::replication::GroupKey;

// Slightly longer than `ReplicationGroupState`'s own waiter-reap timeout, so
// a cancelled/never-committed entry normally gets resolved with
// `ConsensusTimeout` by the group itself; this is only the backstop for the
// rarer case where the command never reaches the poll loop at all.
const REPLY_TIMEOUT: Duration = Duration::from_secs(7);

pub enum LoopCommand {
    RegisterGroup {
        key: GroupKey,
        peers: BTreeSet<String>,
        reply_tx: Sender<()>,
    },
    Append {
        key: GroupKey,
        record: String,
        reply_tx: Sender<Result<(), BrokerError>>,
    },
    Drain {
        key: GroupKey,
        reply_tx: Sender<Result<Vec<String>, BrokerError>>,
    },
    /// Discards every group binding (spec.md §3, `Init` "discards existing
    /// replication-group bindings").
    Reset {
        reply_tx: Sender<()>,
    },
}

#[derive(Clone)]
pub struct TransportHandle {
    cmd_tx: Sender<LoopCommand>,
}

impl TransportHandle {
    pub fn new(cmd_tx: Sender<LoopCommand>) -> Self {
        TransportHandle { cmd_tx }
    }

    /// Instantiates a Replication Group for `key` if one does not already
    /// exist (spec.md §4.3's `ReplicaHandle`, "skip pairs already present").
    pub fn register_group(&self, key: GroupKey, peers: BTreeSet<String>) {
        let (reply_tx, reply_rx) = bounded(1);
        let _ = self.cmd_tx.send(LoopCommand::RegisterGroup {
            key,
            peers,
            reply_tx,
        });
        let _ = reply_rx.recv();
    }

    /// Appends `record` to the group for `key` and blocks until it commits
    /// or the implementation's consensus timeout elapses (spec.md §4.1's
    /// `append`, §5's "implementation-chosen upper bound").
    pub fn append(&self, key: GroupKey, record: String) -> Result<(), BrokerError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send(LoopCommand::Append {
                key,
                record,
                reply_tx,
            })
            .map_err(|_| BrokerError::GroupNotReady)?;
        reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| BrokerError::ConsensusTimeout)?
    }

    /// Drains the group for `key` (spec.md §4.1's `drain`), subject to the
    /// same bounded wait as `append`.
    pub fn drain(&self, key: GroupKey) -> Result<Vec<String>, BrokerError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send(LoopCommand::Drain { key, reply_tx })
            .map_err(|_| BrokerError::GroupNotReady)?;
        reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| BrokerError::ConsensusTimeout)?
    }

    /// Discards every replication-group binding (spec.md §3, `Init`).
    pub fn reset(&self) {
        let (reply_tx, reply_rx) = bounded(1);
        let _ = self.cmd_tx.send(LoopCommand::Reset { reply_tx });
        let _ = reply_rx.recv();
    }
}
