//! Latency benchmarks for the subpub engine.
//!
//! These benchmarks measure the time from publish until the handler
//! has observed the message.

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use std::time::Instant;
use subpub_bench::{forwarding_handler, noop_handler, runtime};
use subpub_core::Engine;

/// Benchmark publish-to-handler latency.
fn bench_delivery_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("delivery_latency");

    group.bench_function("single_subscriber", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let engine: Engine<Bytes> = Engine::new();
                let (handler, mut rx) = forwarding_handler();
                engine.subscribe("bench", handler).expect("subscribe failed");
                let payload = Bytes::from(vec![0u8; 64]);

                let start = Instant::now();
                for _ in 0..iters {
                    engine
                        .publish("bench", payload.clone())
                        .expect("publish failed");
                    rx.recv().await.expect("handler dropped");
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("ten_subscribers", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let engine: Engine<Bytes> = Engine::new();
                let mut rxs = Vec::new();
                for _ in 0..10 {
                    let (handler, rx) = forwarding_handler();
                    engine.subscribe("bench", handler).expect("subscribe failed");
                    rxs.push(rx);
                }
                let payload = Bytes::from(vec![0u8; 64]);

                let start = Instant::now();
                for _ in 0..iters {
                    engine
                        .publish("bench", payload.clone())
                        .expect("publish failed");
                    for rx in &mut rxs {
                        rx.recv().await.expect("handler dropped");
                    }
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Benchmark how long close takes to drain queued deliveries.
fn bench_close_drain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("close_drain");

    group.bench_function("1000_queued", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let mut total = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let engine: Engine<Bytes> = Engine::new();
                    engine.subscribe("bench", noop_handler()).expect("subscribe failed");
                    for _ in 0..1000 {
                        engine
                            .publish("bench", Bytes::from_static(b"payload"))
                            .expect("publish failed");
                    }

                    let start = Instant::now();
                    engine
                        .close(std::time::Duration::from_secs(10))
                        .await
                        .expect("close timed out");
                    total += start.elapsed();
                }
                total
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_delivery_latency, bench_close_drain);
criterion_main!(benches);
