//! Queue and pipeline benchmark suite.
//!
//! Benchmarks the message queue and full pipeline round trips:
//! - Queue: buffered push/pop, handoff to a waiting consumer
//! - Pipeline: echo round trips at different message counts
//!
//! Run with: cargo bench --bench pipeline
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use wsassert::{BlockingQueue, ServerPeer, TestServer, request};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const QUEUE_SIZES: &[usize] = &[100, 10_000];
const ROUND_TRIPS: &[usize] = &[1, 10, 100];

// ============================================================================
// Benchmark: Queue
// ============================================================================

fn bench_queue(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("queue");

    for &size in QUEUE_SIZES {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("buffered", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let queue = BlockingQueue::new();
                for i in 0..size {
                    queue.push(i);
                }
                for _ in 0..size {
                    queue.pop().await;
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("handoff", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let queue = std::sync::Arc::new(BlockingQueue::new());
                let consumer = {
                    let queue = std::sync::Arc::clone(&queue);
                    tokio::spawn(async move {
                        for _ in 0..size {
                            queue.pop().await;
                        }
                    })
                };
                for i in 0..size {
                    queue.push(i);
                    tokio::task::yield_now().await;
                }
                consumer.await.unwrap();
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Pipeline Round Trips
// ============================================================================

fn bench_round_trips(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(echo_server());

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(20);

    for &count in ROUND_TRIPS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("echo", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| run_echo(&server, count));
        });
    }

    group.finish();
    rt.block_on(server.close());
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn echo_server() -> TestServer {
    TestServer::bind(|mut peer: ServerPeer| async move {
        while let Some(message) = peer.recv().await {
            if peer.send(message).await.is_err() {
                break;
            }
        }
    })
    .await
    .unwrap()
}

async fn run_echo(server: &TestServer, count: usize) {
    let mut pipeline = request(server).ws("/bench").unwrap().send_text("0");
    for i in 1..count {
        pipeline = pipeline.send_text(i.to_string());
    }
    for i in 0..count {
        pipeline = pipeline.expect_text(i.to_string());
    }

    pipeline
        .close()
        .expect_closed(None, None)
        .await
        .unwrap();
}

criterion_group!(benches, bench_queue, bench_round_trips);
criterion_main!(benches);
