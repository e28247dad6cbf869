//! Two-level scheduler throughput benchmarks: per-subsystem slice draining
//! and global cycle selection under each built-in strategy.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use facetkernel::domain_types::{
    MaxMessagesPerSlice, QueueCapacity, SchedulingPriority, SliceDurationMs, SubsystemName,
};
use facetkernel::message::{Message, MessageKind};
use facetkernel::queue::OverflowPolicy;
use facetkernel::router::Handler;
use facetkernel::scheduler::global::GlobalScheduler;
use facetkernel::scheduler::subsystem_scheduler::{SelectionStrategy, SubsystemScheduler};
use facetkernel::Subsystem;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn noop_handler() -> Handler {
    Arc::new(|_msg, _params, _opts| json!({"success": true}))
}

fn filled_subsystem(name: &str, message_count: usize) -> Arc<Subsystem> {
    let subsystem = Subsystem::new(
        SubsystemName::try_new(name.to_string()).unwrap(),
        SchedulingPriority::default(),
        QueueCapacity::try_new((message_count + 1).max(1)).unwrap(),
        OverflowPolicy::Reject,
    );
    subsystem.router().register_route("work/:id", noop_handler(), None, None);
    subsystem
}

async fn fill(subsystem: &Arc<Subsystem>, message_count: usize) {
    for i in 0..message_count {
        let message = Arc::new(Message::new(format!("work/{i}"), MessageKind::Command, json!({}), "bench"));
        subsystem.accept(message, json!({})).await;
    }
}

/// Draining a full slice under each selection strategy.
fn bench_subsystem_scheduler_process(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("subsystem_scheduler_process");

    for strategy in [
        SelectionStrategy::Fifo,
        SelectionStrategy::Priority,
        SelectionStrategy::LoadBased,
        SelectionStrategy::Adaptive,
    ] {
        group.throughput(Throughput::Elements(200));
        group.bench_with_input(BenchmarkId::new("strategy", format!("{strategy:?}")), &strategy, |b, &strategy| {
            b.to_async(&rt).iter(|| async move {
                let subsystem = filled_subsystem("work", 200);
                fill(&subsystem, 200).await;
                let scheduler = SubsystemScheduler::new(subsystem, strategy, MaxMessagesPerSlice::try_new(200).unwrap());
                let result = scheduler.process(Duration::from_secs(1)).await;
                black_box(result);
            });
        });
    }
    group.finish();
}

/// One `GlobalScheduler::run_once` cycle with a growing number of
/// registered subsystems, under each built-in global strategy.
fn bench_global_scheduler_run_once(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("global_scheduler_run_once");

    for subsystem_count in [1, 10, 100] {
        for strategy in ["round-robin", "priority", "load-based", "adaptive"] {
            group.throughput(Throughput::Elements(1));
            group.bench_with_input(
                BenchmarkId::new(strategy, subsystem_count),
                &subsystem_count,
                |b, &subsystem_count| {
                    b.to_async(&rt).iter_batched(
                        || {
                            let global = GlobalScheduler::new(SliceDurationMs::try_new(10).unwrap());
                            for i in 0..subsystem_count {
                                let subsystem = filled_subsystem(&format!("work{i}"), 5);
                                rt.block_on(fill(&subsystem, 5));
                                global.register_subsystem(
                                    subsystem.name().clone(),
                                    SubsystemScheduler::new(
                                        subsystem,
                                        SelectionStrategy::Fifo,
                                        MaxMessagesPerSlice::try_new(5).unwrap(),
                                    ),
                                );
                            }
                            global.set_strategy(strategy).unwrap();
                            global.start();
                            global
                        },
                        |global| async move {
                            let scheduled = global.run_once().await;
                            black_box(scheduled);
                        },
                        criterion::BatchSize::SmallInput,
                    );
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_subsystem_scheduler_process, bench_global_scheduler_run_once);
criterion_main!(benches);
