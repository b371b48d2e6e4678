//! Benchmarks for the TTL storage engine:
//! - set throughput with and without key updates
//! - get on a populated store
//! - cull of an expired head

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use grid_node::dht::{NodeId, TtlStorage};
use grid_node::Payload;
use std::time::Duration;

fn keys(count: usize) -> Vec<NodeId> {
    (0..count).map(|i| NodeId::digest(i.to_string())).collect()
}

fn populated(keys: &[NodeId], ttl: Duration) -> TtlStorage<NodeId, Payload> {
    let mut storage = TtlStorage::new(ttl);
    for (i, key) in keys.iter().enumerate() {
        storage.set(key.clone(), Payload::Int(i as i64 + 1));
    }
    storage
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_set");

    for size in [1_000usize, 10_000] {
        let keys = keys(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("fresh", size), &keys, |b, keys| {
            b.iter(|| black_box(populated(keys, Duration::from_secs(3600))));
        });

        group.bench_with_input(BenchmarkId::new("update", size), &keys, |b, keys| {
            let mut storage = populated(keys, Duration::from_secs(3600));
            b.iter(|| {
                for key in keys {
                    storage.set(key.clone(), Payload::Text("updated".to_string()));
                }
            });
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_get");

    for size in [1_000usize, 10_000] {
        let keys = keys(size);
        let mut storage = populated(&keys, Duration::from_secs(3600));
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                for key in &keys {
                    black_box(storage.get(key));
                }
            });
        });
    }

    group.finish();
}

fn bench_cull(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_cull");

    for size in [1_000usize, 10_000] {
        let keys = keys(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter_batched(
                || {
                    let storage = populated(keys, Duration::from_millis(50));
                    std::thread::sleep(Duration::from_millis(60));
                    storage
                },
                |mut storage| black_box(storage.cull()),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_cull);
criterion_main!(benches);
