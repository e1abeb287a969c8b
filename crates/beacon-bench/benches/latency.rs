//! Latency benchmarks for Beacon.
//!
//! These benchmarks focus on publish-to-delivery and session setup time.

use beacon_bench::{full_audience, identity, PREFIX};
use beacon_bus::{MemoryBus, MessageBus, SetStore};
use beacon_core::{ChannelResolver, PresenceTracker, SubscriptionSession};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Instant;

/// Benchmark publish + receive through a session.
fn bench_pubsub_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("pubsub_latency");
    let runtime = tokio::runtime::Runtime::new().expect("runtime");

    group.bench_function("single_subscriber", |b| {
        b.to_async(&runtime).iter_custom(|iters| async move {
            let bus = MemoryBus::with_capacity(1024);
            let mut session = SubscriptionSession::open(&bus, ["room".to_string()])
                .await
                .expect("subscribe");

            let start = Instant::now();
            for _ in 0..iters {
                bus.publish("room", Bytes::from_static(&[0u8; 64]))
                    .await
                    .expect("publish");
                black_box(session.read_next().await.expect("read"));
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark the work done when a client connects.
fn bench_connect(c: &mut Criterion) {
    let mut group = c.benchmark_group("connect");
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let resolver = ChannelResolver::new(PREFIX);
    let audience = full_audience();

    group.bench_function("resolve_subscribe_presence", |b| {
        b.to_async(&runtime).iter_custom(|iters| {
            let resolver = resolver.clone();
            async move {
                let bus = Arc::new(MemoryBus::new());
                let store: Arc<dyn SetStore> = bus.clone();
                let presence = PresenceTracker::new(store, PREFIX);

                let start = Instant::now();
                for i in 0..iters as usize {
                    let who = identity(i);
                    let channels = resolver.resolve("chatroom", &audience, &who);
                    let mut session =
                        SubscriptionSession::open(bus.as_ref(), channels.subscribe)
                            .await
                            .expect("subscribe");
                    presence.connect("chatroom", &who).await.expect("presence");
                    session.close();
                    presence.disconnect("chatroom", &who).await.expect("presence");
                }
                start.elapsed()
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pubsub_latency, bench_connect);
criterion_main!(benches);
