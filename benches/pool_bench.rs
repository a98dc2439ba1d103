//! Performance benchmarks for pooled buffers

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mytunnel_pool::config::PoolConfig;
use mytunnel_pool::pool::PoolArena;

fn allocation_benchmark(c: &mut Criterion) {
    let arena = PoolArena::new(PoolConfig::default()).unwrap();

    let mut group = c.benchmark_group("allocate_release");
    for size in [64usize, 1024, 16 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let buf = arena.buffer(black_box(size)).unwrap();
                black_box(&buf);
                drop(buf);
            })
        });
    }
    group.finish();
}

fn resize_benchmark(c: &mut Criterion) {
    let arena = PoolArena::new(PoolConfig::default()).unwrap();

    let mut group = c.benchmark_group("set_capacity");

    group.bench_function("in_place", |b| {
        let mut buf = arena.buffer(600).unwrap();
        b.iter(|| {
            buf.set_capacity(black_box(1000)).unwrap();
            buf.set_capacity(black_box(600)).unwrap();
        })
    });

    group.bench_function("reallocate", |b| {
        let mut buf = arena.buffer(600).unwrap();
        b.iter(|| {
            buf.set_capacity(black_box(2000)).unwrap();
            buf.set_capacity(black_box(600)).unwrap();
        })
    });

    group.finish();
}

fn write_benchmark(c: &mut Criterion) {
    let arena = PoolArena::new(PoolConfig::default()).unwrap();
    let payload = vec![0xabu8; 4096];

    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("write_bytes_4k", |b| {
        b.iter(|| {
            let mut buf = arena.buffer(256).unwrap();
            buf.write_bytes(black_box(&payload)).unwrap();
            black_box(buf.readable_bytes());
        })
    });

    group.finish();
}

fn metrics_benchmark(c: &mut Criterion) {
    use mytunnel_pool::metrics::METRICS;

    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("snapshot", |b| {
        b.iter(|| {
            let snapshot = METRICS.snapshot();
            black_box(snapshot);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    allocation_benchmark,
    resize_benchmark,
    write_benchmark,
    metrics_benchmark,
);
criterion_main!(benches);
