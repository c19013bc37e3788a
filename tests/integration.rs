use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;
use serial_test::serial;

use partbroker::error::BrokerError;
use partbroker::replication::GroupKey;
use partbroker::transport::PollLoop;

#[rstest]
#[case::no_such_topic(BrokerError::NoSuchTopic("invoices".to_string()), "Topic invoices does not exist.")]
#[case::no_such_producer(BrokerError::NoSuchProducer(7), "Producer doesn't exist.")]
#[case::wrong_topic(BrokerError::WrongTopic("invoices".to_string()), "Producer cannot publish to invoices.")]
#[case::lock_busy(BrokerError::LockBusy, "Lock cannot be acquired.")]
#[case::group_not_ready(BrokerError::GroupNotReady, "Raft Instance not ready.")]
#[case::invalid_transaction(BrokerError::InvalidTransaction, "Invalid transaction request.")]
fn error_messages_match_the_producer_facing_contract(#[case] err: BrokerError, #[case] expected: &str) {
    assert_eq!(err.message(), expected);
}

/// Binds two real raft-port listeners and drives a two-node Replication
/// Group to a committed, replicated append — exercising C1 and C2 together
/// the way a live broker pair would.
#[test]
#[serial]
fn two_node_replication_group_replicates_appended_records() {
    let (loop_a, handle_a, _shutdown_a) = PollLoop::bind("127.0.0.1:17801".to_string(), 17801)
        .expect("bind raft port 17801");
    let (loop_b, handle_b, _shutdown_b) = PollLoop::bind("127.0.0.1:17802".to_string(), 17802)
        .expect("bind raft port 17802");

    let _handle_a_thread = loop_a.spawn();
    let _handle_b_thread = loop_b.spawn();

    let mut peers = BTreeSet::new();
    peers.insert("127.0.0.1:17801".to_string());
    peers.insert("127.0.0.1:17802".to_string());

    let key = GroupKey {
        topic: "orders".to_string(),
        partition: "p0".to_string(),
    };
    handle_a.register_group(key.clone(), peers.clone());
    handle_b.register_group(key.clone(), peers);

    let record =
        "INSERT INTO message(message, topic_name, partition_id, subscribers) VALUES('x', 'orders', 'p0', 0);"
            .to_string();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut appended = false;
    while Instant::now() < deadline && !appended {
        if handle_a.append(key.clone(), record.clone()).is_ok() {
            appended = true;
        } else if handle_b.append(key.clone(), record.clone()).is_ok() {
            appended = true;
        } else {
            thread::sleep(Duration::from_millis(50));
        }
    }
    assert!(appended, "append did not commit before a leader was elected");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut drained = Vec::new();
    while Instant::now() < deadline && drained.is_empty() {
        if let Ok(records) = handle_a.drain(key.clone()) {
            if !records.is_empty() {
                drained = records;
                break;
            }
        }
        if let Ok(records) = handle_b.drain(key.clone()) {
            if !records.is_empty() {
                drained = records;
                break;
            }
        }
        thread::sleep(Duration::from_millis(50));
    }

    assert_eq!(drained, vec![record]);
}
