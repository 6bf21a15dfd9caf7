//! HOT PATH PERFORMANCE BENCHMARKS
//!
//! The operations instrumentation call sites pay for on every event:
//! enqueueing into the ring buffer, recording a measurement and
//! submitting to a running batch processor.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use telepipe_lib::buffer::RingBuffer;
use telepipe_lib::core::{Attributes, Batch, BatchConfig};
use telepipe_lib::export::{ExportResult, Exporter};
use telepipe_lib::logs::{LogRecord, LogSeverity};
use telepipe_lib::metrics::{AggregationStore, Meter, Temporality};
use telepipe_lib::pipeline::BatchProcessor;

/// Accepts every batch and keeps nothing
struct DiscardExporter;

#[async_trait::async_trait]
impl Exporter for DiscardExporter {
    async fn export(&mut self, batch: &Batch) -> ExportResult {
        black_box(batch.len());
        ExportResult::Success
    }

    fn name(&self) -> &str {
        "discard"
    }
}

/// TARGET: <50ns per enqueue/dequeue pair
fn bench_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("enqueue_dequeue", |b| {
        let ring = RingBuffer::new(1024).unwrap();
        b.iter(|| {
            ring.try_enqueue(black_box(42u64));
            black_box(ring.try_dequeue());
        });
    });

    group.bench_function("enqueue_full", |b| {
        let ring = RingBuffer::new(16).unwrap();
        for n in 0..16u64 {
            ring.try_enqueue(n);
        }
        b.iter(|| black_box(ring.try_enqueue(black_box(7u64))));
    });

    for batch in [64usize, 512] {
        group.bench_with_input(BenchmarkId::new("drain", batch), &batch, |b, &batch| {
            let ring = RingBuffer::new(batch).unwrap();
            b.iter(|| {
                for n in 0..batch as u64 {
                    ring.try_enqueue(n);
                }
                black_box(ring.drain(batch));
            });
        });
    }

    group.finish();
}

/// TARGET: <200ns per measurement on an existing series
fn bench_metric_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("metric_recording");
    let meter = Meter::new(Arc::new(AggregationStore::new(Temporality::Cumulative, 2000).unwrap()));
    let counter = meter.counter("requests").unwrap();
    let histogram = meter.histogram("latency").unwrap();
    let attrs = Attributes::new().with("route", "/api").with("status", "200");

    group.bench_function("counter_add", |b| {
        b.iter(|| counter.add(black_box(1.0), &attrs));
    });

    group.bench_function("histogram_record", |b| {
        let mut value = 0.0;
        b.iter(|| {
            value = (value + 7.0) % 1000.0;
            histogram.record(black_box(value), &attrs);
        });
    });

    let exponential = meter.exponential_histogram("latency_exp").unwrap();
    group.bench_function("exponential_histogram_record", |b| {
        let mut value = 0.5;
        b.iter(|| {
            value = (value * 1.7) % 10_000.0 + 0.5;
            exponential.record(black_box(value), &attrs);
        });
    });

    group.bench_function("collect_100_series", |b| {
        let store = AggregationStore::new(Temporality::Delta, 2000).unwrap();
        let meter = Meter::new(Arc::new(store));
        let counter = meter.counter("by_route").unwrap();
        let routes: Vec<Attributes> = (0..100)
            .map(|n| Attributes::new().with("route", format!("/r/{}", n)))
            .collect();
        let mut timestamp = 0u64;
        b.iter(|| {
            for attrs in &routes {
                counter.add(1.0, attrs);
            }
            timestamp += 1;
            black_box(meter.store().collect_points(timestamp));
        });
    });

    group.finish();
}

/// TARGET: <500ns per submit while the worker drains in the background
fn bench_processor_submit(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let config = BatchConfig {
        max_queue_size: 8192,
        max_export_batch_size: 512,
        scheduled_delay: Duration::from_millis(100),
        export_timeout: Duration::from_secs(5),
    };
    let processor = BatchProcessor::new(DiscardExporter, config).unwrap();

    let mut group = c.benchmark_group("processor_submit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("log_record", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let record = LogRecord::new(n, LogSeverity::Info, "request handled");
            black_box(processor.submit(record.into()));
        });
    });
    group.finish();

    runtime.block_on(processor.close(Duration::from_secs(5)));
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1));
    targets = bench_ring_buffer, bench_metric_recording, bench_processor_submit
}
criterion_main!(benches);
