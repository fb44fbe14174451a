use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use seqalloc::{
    Allocator, AllocatorOptions, Context, LocalSequenceCache, MemorySequenceStore, SequenceCache,
};
use std::{sync::Arc, time::Instant};
use tokio::runtime::{Builder, Runtime};

// Number of IDs drawn per benchmark iteration (per task for multi-task runs).
const TOTAL_IDS: usize = 4096;

fn runtime(workers: usize) -> Runtime {
    Builder::new_multi_thread()
        .enable_all()
        .worker_threads(workers)
        .build()
        .unwrap()
}

type MemoryAllocator = Allocator<MemorySequenceStore, LocalSequenceCache, LocalSequenceCache>;

/// Both caches are in-process rings so the numbers reflect orchestration
/// overhead only.
fn memory_allocator(shared_available: bool, options: AllocatorOptions) -> MemoryAllocator {
    Allocator::with_shared_available(
        MemorySequenceStore::default(),
        LocalSequenceCache::new(options.extern_patch as usize),
        LocalSequenceCache::new(options.local_patch as usize),
        options,
        shared_available,
    )
}

/// Fill then drain a ring buffer of `TOTAL_IDS` slots.
fn bench_ring_fill_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("local/ring");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    let ids: Vec<u64> = (0..TOTAL_IDS as u64).collect();
    group.bench_function(format!("fill+drain/{TOTAL_IDS}"), |b| {
        let rt = runtime(1);
        b.to_async(&rt).iter_custom(|iters| {
            let ids = ids.clone();
            async move {
                let cache = LocalSequenceCache::new(TOTAL_IDS);
                let ctx = Context::background();
                let start = Instant::now();

                for _ in 0..iters {
                    cache.fill_ids(&ctx, &ids).await.unwrap();
                    for _ in 0..TOTAL_IDS {
                        black_box(cache.get_single_id(&ctx).await.unwrap());
                    }
                }

                start.elapsed()
            }
        });
    });

    group.finish();
}

/// Single task drawing ids through the allocator.
fn bench_allocator_sequential(c: &mut Criterion, name: &str, shared_available: bool) {
    let mut group = c.benchmark_group(name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        let rt = runtime(1);
        b.to_async(&rt).iter_custom(|iters| async move {
            let alloc = memory_allocator(shared_available, AllocatorOptions::default());
            let ctx = Context::background();
            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..TOTAL_IDS {
                    black_box(alloc.next_id(&ctx).await.unwrap());
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}

/// Many tasks sharing one allocator across worker threads.
fn bench_allocator_contended(c: &mut Criterion, name: &str, shared_available: bool) {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let tasks = workers * 4;

    let mut group = c.benchmark_group(name);
    group.throughput(Throughput::Elements((TOTAL_IDS * tasks) as u64));

    group.bench_function(format!("tasks/{tasks}/elems/{TOTAL_IDS}"), |b| {
        let rt = runtime(workers);
        b.to_async(&rt).iter_custom(|iters| async move {
            let alloc = Arc::new(memory_allocator(
                shared_available,
                AllocatorOptions::default(),
            ));
            let start = Instant::now();

            for _ in 0..iters {
                let handles = (0..tasks).map(|_| {
                    let alloc = Arc::clone(&alloc);
                    tokio::spawn(async move {
                        let ctx = Context::background();
                        for _ in 0..TOTAL_IDS {
                            black_box(alloc.next_id(&ctx).await?);
                        }
                        Ok::<_, seqalloc::Error>(())
                    })
                });
                for res in try_join_all(handles).await.unwrap() {
                    res.unwrap();
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}

fn benchmark_allocator_shared_sequential(c: &mut Criterion) {
    bench_allocator_sequential(c, "allocator/sequential/shared", true);
}

fn benchmark_allocator_local_sequential(c: &mut Criterion) {
    bench_allocator_sequential(c, "allocator/sequential/local", false);
}

fn benchmark_allocator_shared_contended(c: &mut Criterion) {
    bench_allocator_contended(c, "allocator/contended/shared", true);
}

fn benchmark_allocator_local_contended(c: &mut Criterion) {
    bench_allocator_contended(c, "allocator/contended/local", false);
}

criterion_group!(
    benches,
    bench_ring_fill_drain,
    benchmark_allocator_shared_sequential,
    benchmark_allocator_local_sequential,
    benchmark_allocator_shared_contended,
    benchmark_allocator_local_contended,
);
criterion_main!(benches);
