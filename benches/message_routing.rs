//! Route-table matching and message-accept throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use facetkernel::domain_types::{QueueCapacity, SchedulingPriority};
use facetkernel::message::{Message, MessageKind};
use facetkernel::queue::OverflowPolicy;
use facetkernel::router::{Handler, SubsystemRouter};
use facetkernel::Subsystem;
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn noop_handler() -> Handler {
    Arc::new(|_msg, _params, _opts| json!({"success": true}))
}

fn router_with_routes(route_count: usize) -> SubsystemRouter {
    let router = SubsystemRouter::new();
    for i in 0..route_count {
        router.register_route(format!("widgets/{i}/:id"), noop_handler(), None, None);
    }
    router.register_route("widgets/create", noop_handler(), None, None);
    router
}

/// Matching a static route against growing numbers of parameterized
/// competitors: static-beats-parameterized should keep this flat.
fn bench_match_static_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_static_route");
    for route_count in [1, 10, 100, 1000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("routes", route_count), &route_count, |b, &route_count| {
            let router = router_with_routes(route_count);
            b.iter(|| {
                let result = router.match_path("widgets/create");
                black_box(result);
            });
        });
    }
    group.finish();
}

/// Matching a parameterized route, which must scan every candidate pattern.
fn bench_match_parameterized_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_parameterized_route");
    for route_count in [1, 10, 100, 1000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("routes", route_count), &route_count, |b, &route_count| {
            let router = router_with_routes(route_count);
            let path = format!("widgets/{}/42", route_count / 2);
            b.iter(|| {
                let result = router.match_path(&path);
                black_box(result);
            });
        });
    }
    group.finish();
}

fn bench_no_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_miss");
    for route_count in [1, 10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("routes", route_count), &route_count, |b, &route_count| {
            let router = router_with_routes(route_count);
            b.iter(|| {
                let result = router.match_path("nosuch/path");
                black_box(result);
            });
        });
    }
    group.finish();
}

fn test_subsystem(route_count: usize) -> Arc<Subsystem> {
    let name = facetkernel::domain_types::SubsystemName::try_new("bench".to_string()).unwrap();
    let subsystem = Subsystem::new(
        name,
        SchedulingPriority::default(),
        QueueCapacity::try_new(100_000).unwrap(),
        OverflowPolicy::Reject,
    );
    for i in 0..route_count {
        subsystem.router().register_route(format!("bench/{i}/:id"), noop_handler(), None, None);
    }
    subsystem
}

/// End-to-end `accept` throughput for a query message, which dispatches
/// synchronously rather than enqueueing.
fn bench_accept_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("accept_query");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_route", |b| {
        let subsystem = test_subsystem(10);
        b.to_async(&rt).iter(|| async {
            let message = Arc::new(Message::new("bench/5/1", MessageKind::Query, json!({}), "bench"));
            let accepted = subsystem.accept(Arc::clone(&message), json!({})).await;
            black_box((accepted, message.get_query_result()));
        });
    });
    group.finish();
}

/// Enqueue throughput for command messages under different queue depths.
fn bench_accept_command(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("accept_command");

    for batch in [1, 100, 1000] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("batch", batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| async {
                let subsystem = test_subsystem(10);
                for i in 0..batch {
                    let message =
                        Arc::new(Message::new(format!("bench/5/{i}"), MessageKind::Command, json!({}), "bench"));
                    let accepted = subsystem.accept(message, json!({})).await;
                    black_box(accepted);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_match_static_route,
    bench_match_parameterized_route,
    bench_no_match,
    bench_accept_query,
    bench_accept_command,
);
criterion_main!(benches);
