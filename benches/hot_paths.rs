//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! Per-event costs on the consumer path: payload decode, aggregator apply
//! against the in-memory store, cache reads, and partition routing.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use metric_aggregator::metrics::{
    Aggregator, ConsumerAdapter, IncrementStrategy, MetricCache, MetricEvent, MetricKind,
};
use metric_aggregator::store::InMemoryMetricStore;
use metric_aggregator::transport::{codec, partition_for};
use std::sync::Arc;

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    let payload = codec::encode(
        &MetricEvent::increment("library.errors.total").with_description("errors raised"),
    )
    .unwrap();

    group.bench_function("decode", |b| b.iter(|| codec::decode(black_box(&payload))));
    group.bench_function("routing_key", |b| {
        b.iter(|| codec::routing_key(black_box(&payload)))
    });

    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregator_apply");
    group.throughput(Throughput::Elements(1));

    for (label, strategy) in [
        ("increment_atomic", IncrementStrategy::Atomic),
        (
            "increment_optimistic",
            IncrementStrategy::Optimistic { max_attempts: 3 },
        ),
    ] {
        let aggregator = Aggregator::with_strategy(InMemoryMetricStore::new(), strategy);
        let event = MetricEvent::increment("library.errors.total");
        aggregator.apply(&event);

        group.bench_function(label, |b| b.iter(|| aggregator.apply(black_box(&event))));
    }

    let aggregator = Aggregator::new(InMemoryMetricStore::new());
    let event = MetricEvent::set("library.members.active", 42, MetricKind::Gauge);
    aggregator.apply(&event);
    group.bench_function("set_existing", |b| {
        b.iter(|| aggregator.apply(black_box(&event)))
    });

    group.finish();
}

fn bench_consumer(c: &mut Criterion) {
    let mut group = c.benchmark_group("consumer");
    group.throughput(Throughput::Elements(1));

    let consumer = ConsumerAdapter::new(Arc::new(Aggregator::new(InMemoryMetricStore::new())));
    let payload = codec::encode(&MetricEvent::increment("library.errors.total")).unwrap();

    group.bench_function("handle_payload", |b| {
        b.iter(|| consumer.handle_payload(black_box(&payload)))
    });

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    let cache = MetricCache::new();
    for i in 0..1_000 {
        cache.set(format!("metric.{}", i), i);
    }

    group.bench_function("get_hit", |b| b.iter(|| cache.get(black_box("metric.500"))));
    group.bench_function("get_miss", |b| b.iter(|| cache.get(black_box("metric.none"))));

    group.finish();
}

fn bench_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("partition_for", |b| {
        b.iter(|| partition_for(black_box("library.cache.misses.total"), black_box(16)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_apply,
    bench_consumer,
    bench_cache,
    bench_routing,
);
criterion_main!(benches);
