//! Dispatch throughput benchmark
//!
//! Measures the submit path (admission → bind → invoke → release) against
//! the in-process unit backend, with warm units so creation cost is excluded.

use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tokio::runtime::Runtime;

use worker_queue::{
    AdmissionRegistry, CallOptions, LocalUnitFactory, WorkerPoolConfig, WorkerPoolManager,
};

fn echo_factory() -> LocalUnitFactory {
    LocalUnitFactory::new().with_method("exec", |payload| async move { Ok(payload) })
}

async fn warm_pool(thread_count: usize, registry: Arc<AdmissionRegistry>) -> WorkerPoolManager {
    let pool = WorkerPoolManager::with_registry(
        Arc::new(echo_factory()),
        WorkerPoolConfig::new(thread_count),
        registry,
    )
    .unwrap();
    pool.warm_up().await.unwrap();
    pool
}

/// Sequential submits on a single warm slot (baseline)
fn bench_sequential(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("dispatch/sequential");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_slot", |b| {
        let pool = rt.block_on(warm_pool(1, Arc::new(AdmissionRegistry::new(64))));
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move {
                pool.submit(json!({"n": 1}), CallOptions::default())
                    .await
                    .unwrap()
            }
        });
    });

    group.finish();
}

/// Concurrent submits contending for a bounded pool
fn bench_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("dispatch/concurrent");

    for thread_count in [1, 4, 16] {
        let tasks = 256u64;
        group.throughput(Throughput::Elements(tasks));
        group.bench_with_input(
            BenchmarkId::new("slots", thread_count),
            &thread_count,
            |b, &thread_count| {
                let registry = Arc::new(AdmissionRegistry::new(64));
                let pool = rt.block_on(warm_pool(thread_count, registry));
                b.to_async(&rt).iter_custom(|iters| {
                    let pool = pool.clone();
                    async move {
                        let start = Instant::now();
                        for _ in 0..iters {
                            let handles: Vec<_> = (0..tasks)
                                .map(|i| {
                                    let pool = pool.clone();
                                    tokio::spawn(async move {
                                        pool.submit(json!(i), CallOptions::default()).await
                                    })
                                })
                                .collect();
                            for handle in handles {
                                handle.await.unwrap().unwrap();
                            }
                        }
                        start.elapsed()
                    }
                });
            },
        );
    }

    group.finish();
}

/// Two pools sharing a tight global cap
fn bench_shared_cap(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("dispatch/shared_cap");
    let tasks = 128u64;
    group.throughput(Throughput::Elements(tasks * 2));

    group.bench_function("cap_2_two_pools", |b| {
        let registry = Arc::new(AdmissionRegistry::new(2));
        let pools = rt.block_on(async {
            vec![
                warm_pool(4, Arc::clone(&registry)).await,
                warm_pool(4, Arc::clone(&registry)).await,
            ]
        });
        b.to_async(&rt).iter_custom(|iters| {
            let pools = pools.clone();
            async move {
                let start = Instant::now();
                for _ in 0..iters {
                    let handles: Vec<_> = pools
                        .iter()
                        .flat_map(|pool| (0..tasks).map(move |i| (pool.clone(), i)))
                        .map(|(pool, i)| {
                            tokio::spawn(async move {
                                pool.submit(json!(i), CallOptions::default()).await
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap().unwrap();
                    }
                }
                start.elapsed()
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_sequential, bench_concurrent, bench_shared_cap);
criterion_main!(benches);
