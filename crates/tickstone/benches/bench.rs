use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};
use tickstone::{
    AllocatorConfig, MemoryBoundStore, MonotonicClock, ServiceConfig, TimestampAllocator,
    TimestampService,
};
use tokio::runtime::{Builder, Runtime};

// Timestamps handed out per benchmark iteration (split across threads for the
// contended variants).
const TOTAL_TIMESTAMPS: u64 = 4096;

fn runtime() -> Runtime {
    Builder::new_multi_thread().enable_all().build().unwrap()
}

/// An allocator whose buffer already covers every handout of one iteration.
fn warm_allocator(rt: &Runtime) -> TimestampAllocator<MemoryBoundStore, MonotonicClock> {
    rt.block_on(async {
        let config = AllocatorConfig::default().with_buffer_size(TOTAL_TIMESTAMPS * 2);
        let allocator =
            TimestampAllocator::load(MemoryBoundStore::new(), MonotonicClock::new(), config)
                .await
                .unwrap();
        allocator.allocate_more_timestamps().await.unwrap();
        allocator
    })
}

/// Single-timestamp handouts from a buffer that never runs dry.
fn bench_hand_out(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("allocator/hand_out");
    group.throughput(Throughput::Elements(TOTAL_TIMESTAMPS));

    group.bench_function(format!("elems/{TOTAL_TIMESTAMPS}"), |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            for _ in 0..iters {
                let allocator = warm_allocator(&rt);
                let start = Instant::now();
                for _ in 0..TOTAL_TIMESTAMPS {
                    black_box(allocator.hand_out_count(1).unwrap());
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    group.finish();
}

/// One allocator shared by several threads, all handing out single timestamps.
fn bench_hand_out_contended(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("allocator/hand_out_contended");

    for thread_count in [1, 2, 4, 8, 16] {
        let per_thread = TOTAL_TIMESTAMPS / thread_count;

        group.throughput(Throughput::Elements(TOTAL_TIMESTAMPS));
        group.bench_function(
            format!("elems/{TOTAL_TIMESTAMPS}/threads/{thread_count}"),
            |b| {
                b.iter_custom(|iters| {
                    let mut elapsed = Duration::ZERO;
                    for _ in 0..iters {
                        let allocator = Arc::new(warm_allocator(&rt));
                        let barrier = Arc::new(Barrier::new(thread_count as usize + 1));
                        let start = Instant::now();
                        scope(|s| {
                            for _ in 0..thread_count {
                                let allocator = Arc::clone(&allocator);
                                let barrier = Arc::clone(&barrier);
                                s.spawn(move || {
                                    barrier.wait();
                                    for _ in 0..per_thread {
                                        black_box(allocator.hand_out_count(1).unwrap());
                                    }
                                });
                            }
                            barrier.wait();
                        });
                        elapsed += start.elapsed();
                    }
                    elapsed
                });
            },
        );
    }

    group.finish();
}

/// The service path, including synchronous refills and refresher wakeups.
fn bench_service(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("service/fresh_timestamp");

    for task_count in [1, 4, 16] {
        let per_task = TOTAL_TIMESTAMPS / task_count;

        group.throughput(Throughput::Elements(TOTAL_TIMESTAMPS));
        group.bench_function(
            format!("elems/{TOTAL_TIMESTAMPS}/tasks/{task_count}"),
            |b| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let config = AllocatorConfig::default().with_buffer_size(1_024);
                    let allocator = TimestampAllocator::load(
                        MemoryBoundStore::new(),
                        MonotonicClock::new(),
                        config,
                    )
                    .await
                    .unwrap();
                    let service = TimestampService::start(allocator, ServiceConfig::default());

                    let start = Instant::now();
                    for _ in 0..iters {
                        let tasks = (0..task_count).map(|_| {
                            let service = service.clone();
                            tokio::spawn(async move {
                                for _ in 0..per_task {
                                    black_box(service.fresh_timestamp().await.unwrap());
                                }
                            })
                        });
                        try_join_all(tasks).await.unwrap();
                    }
                    let elapsed = start.elapsed();

                    service.shutdown().await;
                    elapsed
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_hand_out,
    bench_hand_out_contended,
    bench_service
);
criterion_main!(benches);
