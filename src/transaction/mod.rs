//! Transaction Processor (C3, spec.md §4.3): applies controller-issued
//! transactions to broker state and routes publishes into the owning
//! Replication Group.
//!
//! Grounded on `command::mod::Command::parse`'s tagged-dispatch shape and
//! `server::util::run_command::run_command_and_get_response`'s
//! per-variant apply logic; publish semantics from
//! `original_source/src/broker/broker.py`'s `process_transaction` and
//! `publish_message`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::model::{BrokerId, Message, Partition, Producer, Topic};
use crate::publish_lock::{PublishSerializer, PublishState};
use crate::replication::GroupKey;
use crate::transport::TransportHandle;

/// One controller-issued transaction (spec.md §4.3's table), tagged by the
/// wire `req` discriminator (spec.md §6). Unknown tags never construct this
/// type at all — `serde_json` rejects them, which the caller maps to
/// `InvalidTransaction`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "req")]
pub enum Transaction {
    Init {
        broker_id: String,
        topics: Vec<String>,
        producers: Vec<ProducerAssignment>,
    },
    CreateTopic {
        topic: String,
    },
    ProducerRegister {
        producer_id: i64,
        topic: String,
    },
    ReplicaHandle {
        assignments: Vec<ReplicaAssignment>,
    },
    Enqueue {
        producer_id: i64,
        topic: String,
        message: String,
    },
    EnqueueWithPartition {
        producer_id: i64,
        topic: String,
        message: String,
        partition: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerAssignment {
    pub producer_id: i64,
    pub topic: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaAssignment {
    pub topic: String,
    pub partition: String,
    // host:raft-port of every peer in this group, per spec.md §4.3.
    pub raft_ports: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TransactionResult {
    fn ok() -> Self {
        TransactionResult {
            status: "success",
            message: None,
        }
    }

    fn err(err: &BrokerError) -> Self {
        TransactionResult {
            status: "failure",
            message: Some(err.message()),
        }
    }
}

struct ProcessorState {
    broker_id: Option<BrokerId>,
    topics: HashMap<String, Topic>,
    producers: HashMap<i64, Producer>,
}

impl ProcessorState {
    fn new() -> Self {
        ProcessorState {
            broker_id: None,
            topics: HashMap::new(),
            producers: HashMap::new(),
        }
    }
}

pub struct TransactionProcessor {
    state: Mutex<ProcessorState>,
    transport: TransportHandle,
    publish_lock: PublishSerializer,
}

impl TransactionProcessor {
    pub fn new(transport: TransportHandle) -> Self {
        TransactionProcessor {
            state: Mutex::new(ProcessorState::new()),
            transport,
            publish_lock: PublishSerializer::new(),
        }
    }

    /// Decodes and applies a `SendTransaction` request body (spec.md §6),
    /// returning the response body verbatim (errors travel in-band, never
    /// as a transport error, per spec.md §4.5).
    pub fn apply_wire(&self, data: &[u8]) -> TransactionResult {
        match serde_json::from_slice::<Transaction>(data) {
            Ok(transaction) => match self.apply(transaction) {
                Ok(()) => TransactionResult::ok(),
                Err(err) => TransactionResult::err(&err),
            },
            Err(_) => TransactionResult::err(&BrokerError::InvalidTransaction),
        }
    }

    pub fn apply(&self, transaction: Transaction) -> Result<(), BrokerError> {
        match transaction {
            Transaction::Init {
                broker_id,
                topics,
                producers,
            } => self.apply_init(broker_id, topics, producers),
            Transaction::CreateTopic { topic } => self.apply_create_topic(topic),
            Transaction::ProducerRegister { producer_id, topic } => {
                self.apply_producer_register(producer_id, topic)
            }
            Transaction::ReplicaHandle { assignments } => self.apply_replica_handle(assignments),
            Transaction::Enqueue {
                producer_id,
                topic,
                message,
            } => self.enqueue(producer_id, topic, message),
            // The wire `partition` field is accepted for compatibility but
            // never honored: the partition a publish lands in is always this
            // broker's own id (spec.md §4.3), the same as plain `Enqueue`.
            Transaction::EnqueueWithPartition {
                producer_id,
                topic,
                message,
                partition: _,
            } => self.enqueue(producer_id, topic, message),
        }
    }

    fn apply_init(
        &self,
        broker_id: String,
        topics: Vec<String>,
        producers: Vec<ProducerAssignment>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.broker_id = Some(BrokerId(broker_id.clone()));
        state.topics = topics
            .into_iter()
            .map(|name| {
                let mut topic = Topic::new(name.clone());
                topic
                    .partitions
                    .insert(broker_id.clone(), Partition::default());
                (name, topic)
            })
            .collect();
        state.producers = producers
            .into_iter()
            .map(|p| {
                (
                    p.producer_id,
                    Producer {
                        id: p.producer_id,
                        topic: p.topic,
                    },
                )
            })
            .collect();
        drop(state);

        self.transport.reset();
        Ok(())
    }

    fn apply_create_topic(&self, topic: String) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_topic(&mut state, &topic);
        Ok(())
    }

    fn apply_producer_register(&self, producer_id: i64, topic: String) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_topic(&mut state, &topic);
        state
            .producers
            .entry(producer_id)
            .or_insert(Producer {
                id: producer_id,
                topic,
            });
        Ok(())
    }

    fn apply_replica_handle(&self, assignments: Vec<ReplicaAssignment>) -> Result<(), BrokerError> {
        for assignment in assignments {
            let key = GroupKey {
                topic: assignment.topic,
                partition: assignment.partition,
            };
            let peers: BTreeSet<String> = assignment.raft_ports.into_iter().collect();
            self.transport.register_group(key, peers);
        }
        Ok(())
    }

    fn enqueue(
        &self,
        producer_id: i64,
        topic_name: String,
        message: String,
    ) -> Result<(), BrokerError> {
        let mut guard = self.publish_lock.try_acquire()?;
        guard.advance(PublishState::Validating);

        let group_key = {
            let mut state = self.state.lock().unwrap();

            if !state.topics.contains_key(&topic_name) {
                return Err(BrokerError::NoSuchTopic(topic_name));
            }

            let producer = state
                .producers
                .get(&producer_id)
                .cloned()
                .ok_or(BrokerError::NoSuchProducer(producer_id))?;

            if producer.topic != topic_name {
                return Err(BrokerError::WrongTopic(topic_name));
            }

            // The partition a publish lands in is always this broker's own
            // id — this broker is the leader of the write (spec.md §4.3).
            let partition = state
                .broker_id
                .as_ref()
                .map(BrokerId::to_string)
                .unwrap_or_default();

            // Local bookkeeping is created before consensus is attempted and
            // is never rolled back on failure (spec.md §4.3, §9 — an
            // acknowledged source ambiguity, kept as specified).
            let topic = state.topics.get_mut(&topic_name).expect("checked above");
            topic
                .partitions
                .entry(partition.clone())
                .or_insert_with(Partition::default)
                .messages
                .push(Message::new(message.clone()));

            GroupKey {
                topic: topic_name.clone(),
                partition,
            }
        };

        guard.advance(PublishState::Appending);

        let topic_row = format!(
            "INSERT INTO topic(topic_name, partition_id, bias) SELECT '{}','{}','0' WHERE NOT EXISTS (SELECT topic_name, partition_id FROM topic WHERE topic_name = '{}' and partition_id = {});",
            group_key.topic, group_key.partition, group_key.topic, group_key.partition
        );
        let message_row = format!(
            "INSERT INTO message(message, topic_name, partition_id, subscribers) VALUES('{}', '{}', {}, 0);",
            message, group_key.topic, group_key.partition
        );

        self.transport.append(group_key.clone(), topic_row)?;
        self.transport.append(group_key, message_row)?;

        Ok(())
    }

    /// Creates `topic` if it does not already exist, seeding it with one
    /// partition owned by this broker and empty (spec.md §4.3's `CreateTopic`
    /// row; `original_source/src/broker/broker.py`'s handler does the same
    /// `{str(self.broker_id): {"messages": []}}` seeding).
    fn ensure_topic(&self, state: &mut ProcessorState, topic: &str) {
        if state.topics.contains_key(topic) {
            return;
        }
        let broker_id = state
            .broker_id
            .as_ref()
            .map(BrokerId::to_string)
            .unwrap_or_default();
        let mut fresh = Topic::new(topic.to_string());
        fresh.partitions.insert(broker_id, Partition::default());
        state.topics.insert(topic.to_string(), fresh);
    }

    /// Used by C5's `GetUpdates`: drains the named group's pending-queries
    /// queue, or `GroupNotReady` if no such group exists on this broker.
    pub fn drain(&self, topic: String, partition: String) -> Result<Vec<String>, BrokerError> {
        self.transport.drain(GroupKey { topic, partition })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_transport() -> TransportHandle {
        let (tx, _rx) = crossbeam_channel::unbounded();
        TransportHandle::new(tx)
    }

    #[test]
    fn wrong_topic_publish_is_rejected() {
        let processor = TransactionProcessor::new(dummy_transport());
        processor
            .apply(Transaction::Init {
                broker_id: "1".to_string(),
                topics: vec!["orders".to_string(), "invoices".to_string()],
                producers: vec![ProducerAssignment {
                    producer_id: 42,
                    topic: "orders".to_string(),
                }],
            })
            .unwrap();

        let err = processor
            .apply(Transaction::Enqueue {
                producer_id: 42,
                topic: "invoices".to_string(),
                message: "x".to_string(),
            })
            .unwrap_err();

        assert_eq!(err, BrokerError::WrongTopic("invoices".to_string()));
        assert!(err.message().contains("Producer cannot publish to invoices"));
    }

    #[test]
    fn unknown_producer_publish_is_rejected() {
        let processor = TransactionProcessor::new(dummy_transport());
        processor
            .apply(Transaction::Init {
                broker_id: "1".to_string(),
                topics: vec!["orders".to_string()],
                producers: vec![],
            })
            .unwrap();

        let err = processor
            .apply(Transaction::Enqueue {
                producer_id: 99,
                topic: "orders".to_string(),
                message: "x".to_string(),
            })
            .unwrap_err();

        assert_eq!(err.message(), "Producer doesn't exist.");
    }

    #[test]
    fn publish_without_replica_handle_is_group_not_ready() {
        let processor = TransactionProcessor::new(dummy_transport());
        processor
            .apply(Transaction::Init {
                broker_id: "1".to_string(),
                topics: vec!["orders".to_string()],
                producers: vec![ProducerAssignment {
                    producer_id: 42,
                    topic: "orders".to_string(),
                }],
            })
            .unwrap();

        let err = processor
            .apply(Transaction::Enqueue {
                producer_id: 42,
                topic: "orders".to_string(),
                message: "hello".to_string(),
            })
            .unwrap_err();

        assert_eq!(err.message(), "Raft Instance not ready.");
    }

    #[test]
    fn unparseable_transaction_is_invalid() {
        let processor = TransactionProcessor::new(dummy_transport());
        let result = processor.apply_wire(b"{\"req\":\"NotARealKind\"}");
        assert_eq!(result.status, "failure");
        assert_eq!(result.message.unwrap(), "Invalid transaction request.");
    }
}
