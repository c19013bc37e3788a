use std::fmt::{Display, Formatter};

/// Error taxonomy for the broker core (spec.md §7). Variants carry just
/// enough context to render the exact wire strings the producer-facing
/// contract depends on (`Self::message`) — everything else about a failure
/// is logged, not returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    // C6 was already held by another in-flight publish.
    LockBusy,
    // Topic named in a transaction is unknown to this broker.
    NoSuchTopic(String),
    // Producer-id named in a transaction is unknown to this broker.
    NoSuchProducer(i64),
    // Producer attempted to publish to a topic it is not bound to.
    WrongTopic(String),
    // No Replication Group exists yet for the named topic-partition.
    GroupNotReady,
    // Consensus did not commit within the implementation's timeout.
    ConsensusTimeout,
    // The manager link is down; re-registration is pending on reconnect.
    ManagerDisconnected,
    // Transaction discriminator did not match a known kind.
    InvalidTransaction,
}

impl BrokerError {
    /// The exact text the producer-facing contract depends on (spec.md §6,
    /// §7, §8 scenarios S2-S5).
    pub fn message(&self) -> String {
        match self {
            Self::LockBusy => "Lock cannot be acquired.".to_string(),
            Self::NoSuchTopic(topic) => format!("Topic {} does not exist.", topic),
            Self::NoSuchProducer(_) => "Producer doesn't exist.".to_string(),
            Self::WrongTopic(topic) => format!("Producer cannot publish to {}.", topic),
            Self::GroupNotReady => "Raft Instance not ready.".to_string(),
            Self::ConsensusTimeout => "Consensus operation timed out.".to_string(),
            Self::ManagerDisconnected => "Manager disconnected.".to_string(),
            Self::InvalidTransaction => "Invalid transaction request.".to_string(),
        }
    }

    /// Whether this error is recovered locally without surfacing to the
    /// caller (spec.md §7 "Recovered locally?" column).
    pub fn recovered_locally(&self) -> bool {
        matches!(self, Self::ManagerDisconnected)
    }
}

impl Display for BrokerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl From<raft::node::AppendError<()>> for BrokerError {
    fn from(err: raft::node::AppendError<()>) -> Self {
        match err {
            raft::node::AppendError::Cancelled { .. } => Self::GroupNotReady,
            raft::node::AppendError::LogErr(()) => Self::ConsensusTimeout,
        }
    }
}
