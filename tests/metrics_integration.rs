//! Aggregation store behaviour across collection cycles.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use telepipe_lib::core::{Attributes, ConfigBuilder};
use telepipe_lib::export::InMemoryExporter;
use telepipe_lib::metrics::{
    AggregationStore, InstrumentDescriptor, InstrumentKind, Meter, MetricPoint, MetricValue, Temporality,
    TimeSeriesKey, OVERFLOW_ATTRIBUTE,
};
use telepipe_lib::pipeline::Pipeline;

fn meter(temporality: Temporality, max_series: usize) -> Meter {
    Meter::new(Arc::new(AggregationStore::new(temporality, max_series).unwrap()))
}

fn only_point(points: Vec<MetricPoint>) -> MetricPoint {
    assert_eq!(points.len(), 1, "expected exactly one point: {:?}", points);
    points.into_iter().next().unwrap()
}

#[test]
fn test_cumulative_counter_reports_running_sum() {
    let meter = meter(Temporality::Cumulative, 100);
    let counter = meter.counter("bytes.sent").unwrap();
    let attrs = Attributes::new().with("peer", "a");

    for value in [1.0, 2.5, 3.5] {
        counter.add(value, &attrs);
    }
    let first = only_point(meter.store().collect_points(10));
    assert_eq!(first.value, MetricValue::Sum { value: 7.0, monotonic: true });

    // Cumulative collection does not reset state
    let second = only_point(meter.store().collect_points(20));
    assert_eq!(second.value, MetricValue::Sum { value: 7.0, monotonic: true });
    assert_eq!(second.start_time, first.start_time);
}

#[test]
fn test_delta_counter_second_collect_is_zero() {
    let meter = meter(Temporality::Delta, 100);
    let counter = meter.counter("requests").unwrap();
    let attrs = Attributes::new();

    counter.add(4.0, &attrs);
    counter.add(6.0, &attrs);

    let first = only_point(meter.store().collect_points(100));
    assert_eq!(first.value, MetricValue::Sum { value: 10.0, monotonic: true });
    assert_eq!(first.temporality, Temporality::Delta);

    let second = only_point(meter.store().collect_points(200));
    assert_eq!(second.value, MetricValue::Sum { value: 0.0, monotonic: true });
    assert_eq!(second.start_time, 100);
}

#[test]
fn test_histogram_bucket_counts() {
    let meter = meter(Temporality::Cumulative, 100);
    let histogram = meter.histogram_with_bounds("latency", vec![10.0, 100.0]).unwrap();
    let attrs = Attributes::new();

    for value in [5.0, 50.0, 500.0] {
        histogram.record(value, &attrs);
    }

    let point = only_point(meter.store().collect_points(1));
    assert_eq!(
        point.value,
        MetricValue::Histogram {
            bounds: vec![10.0, 100.0],
            bucket_counts: vec![1, 1, 1],
            count: 3,
            sum: 555.0,
            min: Some(5.0),
            max: Some(500.0),
        }
    );
}

#[test]
fn test_delta_histogram_resets_after_collect() {
    let meter = meter(Temporality::Delta, 100);
    let histogram = meter.histogram_with_bounds("size", vec![1.0]).unwrap();
    histogram.record(0.5, &Attributes::new());

    meter.store().collect_points(1);
    let point = only_point(meter.store().collect_points(2));
    match point.value {
        MetricValue::Histogram { bucket_counts, count, .. } => {
            assert_eq!(bucket_counts, vec![0, 0]);
            assert_eq!(count, 0);
        },
        other => panic!("expected histogram, got {:?}", other),
    }
}

#[test]
fn test_gauge_latest_timestamp_wins_and_ties_go_to_later_call() {
    let meter = meter(Temporality::Cumulative, 100);
    let gauge = meter.gauge("temperature").unwrap();
    let attrs = Attributes::new().with("room", "lab");

    assert!(gauge.record_at(20.0, &attrs, 200));
    // Older measurement arriving late is ignored
    assert!(gauge.record_at(99.0, &attrs, 100));
    // Same timestamp: the later call wins
    assert!(gauge.record_at(21.0, &attrs, 200));

    let key = TimeSeriesKey::new("temperature", attrs);
    assert_eq!(meter.store().peek(&key), Some(MetricValue::Gauge { value: 21.0 }));
}

#[test]
fn test_identical_label_sets_share_one_series() {
    let meter = meter(Temporality::Cumulative, 100);
    let counter = meter.counter("hits").unwrap();

    let mut first = Attributes::new();
    first.insert("b", "2");
    first.insert("a", "1");
    let second = Attributes::new().with("a", "1").with("b", "2");

    counter.add(1.0, &first);
    counter.add(1.0, &second);

    let point = only_point(meter.store().collect_points(1));
    assert_eq!(point.value, MetricValue::Sum { value: 2.0, monotonic: true });
}

#[test]
fn test_cardinality_limit_folds_into_overflow_series() {
    let meter = meter(Temporality::Cumulative, 3);
    let counter = meter.counter("by_user").unwrap();

    for user in 0..10 {
        counter.add(1.0, &Attributes::new().with("user", user.to_string()));
    }

    let points = meter.store().collect_points(1);
    let overflow: Vec<_> = points.iter().filter(|p| p.is_overflow()).collect();
    assert_eq!(overflow.len(), 1);
    assert_eq!(overflow[0].attributes.get(OVERFLOW_ATTRIBUTE), Some("true"));

    let total: f64 = points.iter().filter_map(|p| p.value.as_f64()).sum();
    assert_eq!(total, 10.0);
    assert!(meter.store().stats().overflowed_measurements > 0);
}

#[test]
fn test_invalid_measurements_are_counted() {
    let meter = meter(Temporality::Cumulative, 100);
    let counter = meter.counter("c").unwrap();
    let gauge = meter.gauge("g").unwrap();

    counter.add(-1.0, &Attributes::new());
    gauge.record(f64::NAN, &Attributes::new());
    meter.store().record("unknown", 1.0, &Attributes::new());

    assert_eq!(meter.store().dropped_measurements(), 3);
    assert!(meter.store().collect_points(1).is_empty());
}

#[test]
fn test_kind_conflict_on_reregistration() {
    let store = AggregationStore::new(Temporality::Cumulative, 10).unwrap();
    store
        .register(InstrumentDescriptor::new("x", InstrumentKind::Counter))
        .unwrap();
    assert!(store
        .register(InstrumentDescriptor::new("x", InstrumentKind::Gauge))
        .is_err());
    assert!(store
        .register(InstrumentDescriptor::new("x", InstrumentKind::Counter))
        .is_ok());
}

#[test]
fn test_concurrent_recording_loses_nothing() {
    let meter = meter(Temporality::Cumulative, 100);
    let counter = meter.counter("ops").unwrap();

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let counter = counter.clone();
            std::thread::spawn(move || {
                let attrs = Attributes::new().with("shard", (t % 2).to_string());
                for _ in 0..1000 {
                    counter.add(1.0, &attrs);
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    let points = meter.store().collect_points(1);
    assert_eq!(points.len(), 2);
    let total: f64 = points.iter().filter_map(|p| p.value.as_f64()).sum();
    assert_eq!(total, 8000.0);
}

#[tokio::test(start_paused = true)]
async fn test_collector_feeds_the_pipeline() {
    let exporter = InMemoryExporter::new();
    let config = ConfigBuilder::new()
        .scheduled_delay(Duration::from_secs(3600))
        .collection_interval(Duration::from_secs(1))
        .build()
        .unwrap();
    let pipeline = Pipeline::new(exporter.clone(), config).unwrap();

    pipeline.meter().counter("ticks").unwrap().add(1.0, &Attributes::new());
    assert_eq!(pipeline.stats().accepted, 0);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(pipeline.stats().accepted, 1);

    assert!(pipeline.shutdown(Duration::from_secs(5)).await);
    // Periodic point plus the final collection at shutdown
    assert_eq!(exporter.item_count(), 2);
}
