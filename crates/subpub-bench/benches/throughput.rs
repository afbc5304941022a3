//! Throughput benchmarks for the subpub engine.
//!
//! These benchmarks measure how fast publish can enqueue a message for
//! a growing number of subscribers.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use subpub_bench::{engine_with_subscribers, noop_handler, runtime};
use subpub_core::Engine;

/// Benchmark publish fan-out.
fn bench_publish_fanout(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let mut group = c.benchmark_group("publish_fanout");

    for subscribers in [1, 10, 100, 1000] {
        let engine = engine_with_subscribers("bench", subscribers);
        let payload = Bytes::from(vec![0u8; 64]);

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| engine.publish(black_box("bench"), payload.clone()));
            },
        );
    }

    group.finish();
}

/// Benchmark publish payload sizes with a single subscriber.
fn bench_publish_sizes(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let mut group = c.benchmark_group("publish_size");
    let engine = engine_with_subscribers("bench", 1);

    for size in [64usize, 1024, 65536] {
        let payload = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| engine.publish(black_box("bench"), payload.clone()));
        });
    }

    group.finish();
}

/// Benchmark subscribe and the compaction cost of unsubscribed entries.
fn bench_subscribe(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let mut group = c.benchmark_group("registry");

    group.bench_function("subscribe", |b| {
        let engine: Engine<Bytes> = Engine::new();
        let mut i = 0u64;
        b.iter(|| {
            let subject = format!("subject:{}", i % 1000);
            i += 1;
            engine.subscribe(&subject, noop_handler())
        });
    });

    group.bench_function("subscribe_unsubscribe_publish", |b| {
        let engine: Engine<Bytes> = Engine::new();
        let _keep = engine.subscribe("bench", noop_handler());
        let payload = Bytes::from_static(b"ping");
        b.iter(|| {
            if let Ok(sub) = engine.subscribe("bench", noop_handler()) {
                sub.unsubscribe();
            }
            engine.publish("bench", payload.clone())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_publish_fanout,
    bench_publish_sizes,
    bench_subscribe
);
criterion_main!(benches);
