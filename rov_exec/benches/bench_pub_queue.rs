//! # Publish Queue Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use comms_if::net::{mem::MemBroker, Qos};
use rov_lib::publisher::{PubQueue, PublisherParams, RateLimitedPublisher};
use util::{retry::RetryPolicy, time::ManualClock};

/// Number of distinct topics written to, roughly the number of outbound feeds.
const NUM_TOPICS: usize = 8;

fn pub_queue_benchmark(c: &mut Criterion) {
    let topics: Vec<String> = (0..NUM_TOPICS)
        .map(|i| format!("user/feeds/smartpath.robot.bench-{}", i))
        .collect();

    // ---- Queue only ----

    let queue = PubQueue::new();

    c.bench_function("PubQueue::enqueue", |b| {
        let mut i = 0;
        b.iter(|| {
            queue.enqueue(
                black_box(&topics[i % NUM_TOPICS]),
                black_box("42"),
                false,
                Qos::AtMostOnce,
            );
            i += 1;
        })
    });

    c.bench_function("PubQueue::enqueue+pop_newest", |b| {
        b.iter(|| {
            for t in topics.iter() {
                queue.enqueue(t, "42", false, Qos::AtMostOnce);
            }
            while let Some(m) = queue.pop_newest() {
                black_box(m);
            }
        })
    });

    // ---- Through the publisher ----

    // No rate limit, so every flush reaches the transport
    let broker = MemBroker::new();
    let publisher = Arc::new(RateLimitedPublisher::new(
        Box::new(broker.publisher(None)),
        PublisherParams {
            min_interval_s: 0.0,
            period_s: 0.0,
            retry: RetryPolicy::new(1, 0),
        },
        Arc::new(ManualClock::default()),
    ));

    c.bench_function("RateLimitedPublisher::enqueue+flush", |b| {
        let mut i = 0;
        b.iter(|| {
            publisher.enqueue(&topics[i % NUM_TOPICS], "42", false, Qos::AtMostOnce);
            black_box(publisher.flush().unwrap());
            i += 1;
        })
    });
}

criterion_group!(benches, pub_queue_benchmark);
criterion_main!(benches);
