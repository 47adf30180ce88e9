//! # Mesh Benchmarks
//!
//! | Area | Operation | Target |
//! |------|-----------|--------|
//! | RPC | register + complete one pending call | < 5µs |
//! | Discovery | apply heartbeat to a 1k table | < 10µs |
//! | Discovery | sweep a 1k table | < 1ms |
//! | Bus | topic pattern match | < 1µs |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mesh_01_rpc::PendingCallTable;
use mesh_02_discovery::{
    DiscoveryConfig, DiscoveryEvent, DiscoveryEventKind, ServiceFilter, ServiceId, ServiceTable,
};
use shared_bus::{topic_matches, Payload};
use std::time::Duration;

// ============================================================================
// RPC: pending call table
// ============================================================================

fn bench_pending_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh-01-rpc");
    let table = PendingCallTable::new();

    group.bench_function("register_complete", |b| {
        b.iter(|| {
            let (id, rx) = table.register("orders.get", Duration::from_secs(30));
            black_box(table.complete(id, Ok(Payload::Text("ok".into()))));
            drop(rx);
        })
    });

    group.bench_function("register_expire", |b| {
        b.iter(|| {
            let (id, _rx) = table.register("orders.get", Duration::from_secs(30));
            black_box(table.expire(&id))
        })
    });

    group.finish();
}

// ============================================================================
// Discovery: registry table
// ============================================================================

fn populated_table(size: usize, now_ms: u64) -> (ServiceTable, Vec<DiscoveryEvent>) {
    let mut table = ServiceTable::new(ServiceId::generate());
    let events: Vec<_> = (0..size)
        .map(|i| {
            let config = DiscoveryConfig::for_service(format!("svc-{}", i % 16));
            DiscoveryEvent::new(
                DiscoveryEventKind::Heartbeat,
                config.self_record(ServiceId::generate(), now_ms),
                now_ms,
            )
        })
        .collect();
    for event in &events {
        table.apply(event, now_ms);
    }
    (table, events)
}

fn bench_service_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh-02-discovery");

    for size in [100, 1_000] {
        let (mut table, events) = populated_table(size, 1_000);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("apply_heartbeat", size), &size, |b, _| {
            let mut now = 1_000;
            let mut i = 0;
            b.iter(|| {
                now += 1;
                i = (i + 1) % events.len();
                black_box(table.apply(&events[i], now))
            })
        });

        let filter = ServiceFilter::healthy(Some("svc-3"));
        group.bench_with_input(BenchmarkId::new("filter_by_name", size), &size, |b, _| {
            b.iter(|| black_box(table.filter(&filter).len()))
        });

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("sweep_fresh", size), &size, |b, _| {
            b.iter(|| black_box(table.sweep(2_000, 90_000).len()))
        });
    }

    group.finish();
}

// ============================================================================
// Bus: topic matching
// ============================================================================

fn bench_topic_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared-bus");
    let cases = [
        ("exact", "service.heartbeat.orders", "service.heartbeat.orders"),
        ("star", "service.*.orders", "service.heartbeat.orders"),
        ("hash", "#", "service.heartbeat.orders"),
        ("hash_middle", "service.#.orders", "service.a.b.c.orders"),
    ];
    for (name, pattern, key) in cases {
        group.bench_function(name, |b| {
            b.iter(|| black_box(topic_matches(black_box(pattern), black_box(key))))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_pending_table,
    bench_service_table,
    bench_topic_matching
);
criterion_main!(benches);
