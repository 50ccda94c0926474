//! Benchmarks for convoy components.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use convoy::backend::Backend;
use convoy::balance::strategy::{ConsistentHash, LeastConn, RoundRobin, WeightedRoundRobin};
use convoy::balance::{LoadBalancer, Strategy};
use convoy::breaker::{CircuitBreaker, Registry};
use convoy::metrics::MetricsStore;

fn test_backends(n: usize) -> Vec<Arc<Backend>> {
    (0..n)
        .map(|i| {
            let backend = Backend::new(
                format!("http://127.0.0.1:{}", 9000 + i).parse().unwrap(),
                (i + 1) as u32,
            );
            backend.set_healthy(true);
            Arc::new(backend)
        })
        .collect()
}

fn benchmark_round_robin(c: &mut Criterion) {
    let lb = LoadBalancer::new(Strategy::RoundRobin(RoundRobin::new()));
    let backends = test_backends(10);
    let excluded = HashSet::new();

    c.bench_function("round_robin_select_and_reserve", |b| {
        b.iter(|| {
            if let Ok(chosen) = lb.select_and_reserve(black_box(&backends), &excluded) {
                chosen.decrement_conn();
            }
        })
    });
}

fn benchmark_least_conn(c: &mut Criterion) {
    let lb = LoadBalancer::new(Strategy::LeastConn(LeastConn::new()));
    let backends = test_backends(10);
    let excluded = HashSet::new();

    // Uneven load so the argmin scan has work to do.
    for (i, backend) in backends.iter().enumerate() {
        for _ in 0..i {
            backend.increment_conn();
        }
    }

    c.bench_function("least_conn_select_and_reserve", |b| {
        b.iter(|| {
            if let Ok(chosen) = lb.select_and_reserve(black_box(&backends), &excluded) {
                chosen.decrement_conn();
            }
        })
    });
}

fn benchmark_weighted_round_robin(c: &mut Criterion) {
    let lb = LoadBalancer::new(Strategy::WeightedRoundRobin(WeightedRoundRobin::new()));
    let backends = test_backends(10);
    let excluded = HashSet::new();

    c.bench_function("weighted_round_robin_select_and_reserve", |b| {
        b.iter(|| {
            if let Ok(chosen) = lb.select_and_reserve(black_box(&backends), &excluded) {
                chosen.decrement_conn();
            }
        })
    });
}

fn benchmark_consistent_hash(c: &mut Criterion) {
    let lb = LoadBalancer::new(Strategy::ConsistentHash(ConsistentHash::new(100)));
    let backends = test_backends(10);
    let excluded = HashSet::new();

    c.bench_function("consistent_hash_select_and_reserve", |b| {
        b.iter(|| {
            if let Ok(chosen) =
                lb.select_and_reserve_with_key(black_box(&backends), &excluded, "192.168.1.100")
            {
                chosen.decrement_conn();
            }
        })
    });
}

fn benchmark_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("breaker");

    let cb = CircuitBreaker::new(5, Duration::from_secs(30));
    group.bench_function("allow_closed", |b| {
        b.iter(|| {
            black_box(cb.allow());
        })
    });

    group.bench_function("record_success", |b| {
        b.iter(|| {
            cb.record_success();
        })
    });

    let registry = Registry::new(5, Duration::from_secs(30));
    registry.get("http://127.0.0.1:9000/");
    group.bench_function("registry_get_hit", |b| {
        b.iter(|| {
            black_box(registry.get(black_box("http://127.0.0.1:9000/")));
        })
    });

    group.finish();
}

fn benchmark_metrics_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_store");
    group.throughput(Throughput::Elements(1));

    let mut store = MetricsStore::new();
    group.bench_function("record_response", |b| {
        b.iter(|| {
            store.record_response(
                black_box("http://127.0.0.1:9000/"),
                black_box(Duration::from_millis(10)),
                black_box(200),
            );
        })
    });

    let mut full_store = MetricsStore::new();
    for i in 0..1000u64 {
        full_store.record_response(
            "http://127.0.0.1:9000/",
            Duration::from_micros(500 + i),
            200,
        );
    }
    group.bench_function("snapshot_1000_samples", |b| {
        b.iter(|| {
            black_box(full_store.snapshot(black_box("round-robin")));
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_round_robin,
    benchmark_least_conn,
    benchmark_weighted_round_robin,
    benchmark_consistent_hash,
    benchmark_breaker,
    benchmark_metrics_store,
);

criterion_main!(benches);
