use std::collections::BTreeSet;

use criterion::{criterion_group, criterion_main, Criterion};
use partbroker::replication::ReplicationGroupState;

fn criterion_benchmarks(c: &mut Criterion) {
    c.bench_function("single-node append then drain", |b| {
        let mut group = ReplicationGroupState::new("bench-broker".to_string(), BTreeSet::new());

        b.iter(|| {
            let (append_tx, append_rx) = crossbeam_channel::unbounded();
            group.submit_append(
                "INSERT INTO message(message, topic_name, partition_id, subscribers) VALUES('payload', 'orders', 'bench-broker', 0);".to_string(),
                append_tx,
            );
            append_rx.recv().unwrap().unwrap();

            let (drain_tx, drain_rx) = crossbeam_channel::unbounded();
            group.submit_drain(drain_tx);
            let drained = drain_rx.recv().unwrap().unwrap();
            assert_eq!(drained.len(), 1);
        });
    });
}

criterion_group!(benches, criterion_benchmarks);
criterion_main!(benches);
