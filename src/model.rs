//! Broker-resident data model: topics, partitions, messages, producers.
//!
//! Everything here is in-memory bookkeeping maintained by the Transaction
//! Processor (`crate::transaction`); none of it is the replicated state
//! itself — that lives inside each `ReplicationGroup`'s log.

use std::collections::HashMap;

/// Opaque message payload plus its subscriber count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: String,
    pub subscribers: u32,
}

impl Message {
    pub fn new(payload: impl Into<String>) -> Self {
        Message {
            payload: payload.into(),
            subscribers: 0,
        }
    }
}

/// One (topic-name, partition-id) pair's message sequence, as known locally
/// to this broker. The pair is the identity of one `ReplicationGroup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub messages: Vec<Message>,
}

/// A topic: a name plus a mapping from partition-id to `Partition`.
///
/// Partition-ids are conventionally the owning broker's id (§3).
#[derive(Debug, Clone, Default)]
pub struct Topic {
    pub name: String,
    pub partitions: HashMap<String, Partition>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Topic {
            name: name.into(),
            partitions: HashMap::new(),
        }
    }
}

/// A producer, bound to exactly one topic for the lifetime of this broker's
/// knowledge of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Producer {
    pub id: i64,
    pub topic: String,
}

/// This broker's identity, assigned by the controller at `Init` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerId(pub String);

impl BrokerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BrokerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
