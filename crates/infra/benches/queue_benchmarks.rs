use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use brignext_core::{ConsumerId, Keyspace, Message, MessageId};
use brignext_infra::queue::{Producer, ProducerConfig};
use brignext_infra::retries::{jittered_backoff, max_cumulative_backoff};
use brignext_infra::store::{InMemoryQueueStore, QueueStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_publish_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish_latency");
    group.sample_size(1000);

    group.bench_function("immediate", |b| {
        let store = Arc::new(InMemoryQueueStore::new());
        let producer = Producer::new(store, "bench", ProducerConfig::default());
        b.iter(|| {
            rt.block_on(producer.publish(black_box(&Message::new("payload"))))
                .unwrap();
        });
    });

    group.bench_function("scheduled", |b| {
        let store = Arc::new(InMemoryQueueStore::new());
        let producer = Producer::new(store, "bench", ProducerConfig::default());
        let at = Utc::now() + chrono::Duration::hours(1);
        b.iter(|| {
            rt.block_on(producer.publish(black_box(&Message::scheduled("payload", at))))
                .unwrap();
        });
    });

    group.finish();
}

/// publish → claim → fetch → decode → complete, the path every message takes.
fn bench_delivery_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("delivery_cycle");
    group.throughput(Throughput::Elements(1));

    for body_len in [16usize, 1024, 64 * 1024].iter() {
        group.bench_with_input(
            BenchmarkId::new("in_memory", body_len),
            body_len,
            |b, &body_len| {
                let store = Arc::new(InMemoryQueueStore::new());
                let producer = Producer::new(store.clone(), "bench", ProducerConfig::default());
                let keys = producer.keys().clone();
                let consumer: ConsumerId = "bench-consumer".parse().unwrap();
                let body = vec![b'x'; body_len];

                b.iter(|| {
                    rt.block_on(async {
                        producer.publish(&Message::new(body.clone())).await.unwrap();
                        let id = store.claim(&keys, &consumer).await.unwrap().unwrap();
                        let encoded = store.fetch(&keys, &id).await.unwrap().unwrap();
                        let message = Message::decode(&encoded).unwrap();
                        store.complete(&keys, &consumer, &id).await.unwrap();
                        black_box(message);
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_promote_due(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("promote_due");

    for backlog in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*backlog as u64));
        group.bench_with_input(BenchmarkId::new("backlog", backlog), backlog, |b, &backlog| {
            let keys = Keyspace::new("", "bench");
            let due = Utc::now() - chrono::Duration::seconds(1);

            b.iter_batched(
                || {
                    let store = InMemoryQueueStore::new();
                    rt.block_on(async {
                        for n in 0..backlog {
                            let id: MessageId = format!("m{n}").parse().unwrap();
                            store.publish(&keys, &id, b"{}", Some(due)).await.unwrap();
                        }
                    });
                    store
                },
                |store| {
                    let moved = rt
                        .block_on(store.promote_due(&keys, Utc::now(), 100))
                        .unwrap();
                    black_box(moved);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");
    let cap = Duration::from_secs(10);

    group.bench_function("jittered_backoff", |b| {
        b.iter(|| jittered_backoff(black_box(7), cap, black_box(0.5)));
    });
    group.bench_function("max_cumulative_backoff", |b| {
        b.iter(|| max_cumulative_backoff(black_box(10), cap));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_publish_latency,
    bench_delivery_cycle,
    bench_promote_due,
    bench_backoff
);
criterion_main!(benches);
