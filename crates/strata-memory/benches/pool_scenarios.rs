//! Benchmarks that simulate actual usage patterns.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use strata_memory::prelude::*;

/// Request/response cycle: allocate the request state, use it, reclaim
/// everything with a reset.
fn bench_request_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_response");
    group.throughput(Throughput::Elements(1));

    group.bench_function("pool_with_reset", |b| {
        let mut pool = Pool::create(64 * 1024).unwrap();
        b.iter(|| {
            let req = pool.alloc_bytes(256).unwrap();
            // SAFETY: fresh 256-byte allocation.
            unsafe { std::ptr::write_bytes(req.as_ptr(), 0x42, 256) };

            let resp = pool.alloc_bytes(1024).unwrap();
            // SAFETY: fresh 1024-byte allocation.
            unsafe { std::ptr::write_bytes(resp.as_ptr(), 0x24, 1024) };

            black_box((req, resp));
            pool.reset();
        });
    });

    group.bench_function("pool_per_request", |b| {
        b.iter(|| {
            let pool = Pool::create(DEFAULT_POOL_SIZE).unwrap();
            let headers = pool.alloc_bytes(512).unwrap();
            black_box(headers);
        });
    });

    group.finish();
}

/// Array growth dominated by the cooperative in-place path.
fn bench_array_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_growth");
    group.throughput(Throughput::Elements(1024));

    group.bench_function("push_1024", |b| {
        b.iter(|| {
            let pool = Pool::create(64 * 1024).unwrap();
            let values: Array<'_, u64> = Array::init(&pool, 16).unwrap();
            for i in 0..1024u64 {
                values.push_value(i).unwrap();
            }
            black_box(values.len());
        });
    });

    group.finish();
}

/// List appends: every slot allocation is O(1) and nothing moves.
fn bench_list_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_append");
    group.throughput(Throughput::Elements(1024));

    group.bench_function("push_1024", |b| {
        b.iter(|| {
            let pool = Pool::create(64 * 1024).unwrap();
            let entries: &List<'_, u64> = List::create(&pool, 32).unwrap();
            for i in 0..1024u64 {
                entries.push_value(i).unwrap();
            }
            black_box(entries.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_request_response,
    bench_array_growth,
    bench_list_append
);
criterion_main!(benches);
