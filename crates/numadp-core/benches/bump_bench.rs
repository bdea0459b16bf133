//! Bump allocator benchmarks
//!
//! Measures the allocation hot path on a single node pool, uncontended and
//! under contention from several threads.
//!
//! Performance targets:
//! - Uncontended alloc: < 10ns
//! - Contended alloc (4 threads): < 100ns
//!
//! Run with: cargo bench --bench bump_bench

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use numadp_core::testing::AccountingPlatform;
use numadp_core::{PoolConfig, PoolRegistry};

const POOL_BYTES: u64 = 64 << 20;

fn registry() -> PoolRegistry {
    let platform = Arc::new(AccountingPlatform::uniform(1, POOL_BYTES));
    PoolRegistry::init_with(platform, PoolConfig::default()).unwrap()
}

/// Benchmark single-threaded allocation at several sizes
fn bench_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("bump_alloc");
    let mut registry = registry();

    for size in [64usize, 256, 2048] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("aligned_64", size), &size, |b, &size| {
            b.iter(|| {
                if registry.alloc(0, black_box(size), 64).is_err() {
                    registry.reset_all();
                }
            });
        });
    }

    group.finish();
}

/// Benchmark allocation with several threads hitting the same cursor
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("bump_alloc_contended");
    const PER_THREAD: usize = 10_000;

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let mut registry = registry();
            b.iter(|| {
                registry.reset_all();
                let registry = &registry;
                thread::scope(|s| {
                    for _ in 0..threads {
                        s.spawn(move || {
                            for _ in 0..PER_THREAD {
                                black_box(registry.alloc(0, 64, 64).ok());
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_alloc, bench_contended);
criterion_main!(benches);
