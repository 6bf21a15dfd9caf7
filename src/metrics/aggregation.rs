//! Running aggregation state of a single time series.

use crate::metrics::exponential::{ExponentialBuckets, ExponentialHistogramState};
use crate::metrics::types::{InstrumentKind, MetricValue, Temporality};
use std::sync::Arc;

/// Bucket layout shared by every series of a histogram instrument
#[derive(Debug, Clone)]
pub(crate) enum HistogramLayout {
    Explicit(Arc<[f64]>),
    Exponential(ExponentialBuckets),
}

/// Histogram buckets plus running count/sum/min/max
#[derive(Debug, Clone)]
pub(crate) struct HistogramState {
    bounds: Arc<[f64]>,
    /// `bounds.len() + 1` counters, the last one for values above every bound
    counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramState {
    fn new(bounds: Arc<[f64]>) -> Self {
        let buckets = bounds.len() + 1;
        Self {
            bounds,
            counts: vec![0; buckets],
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    #[inline]
    fn update(&mut self, value: f64) {
        // First bucket whose upper bound is >= value
        let index = self.bounds.partition_point(|bound| *bound < value);
        self.counts[index] += 1;
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn snapshot(&self) -> MetricValue {
        let has_values = self.count > 0;
        MetricValue::Histogram {
            bounds: self.bounds.to_vec(),
            bucket_counts: self.counts.clone(),
            count: self.count,
            sum: self.sum,
            min: has_values.then_some(self.min),
            max: has_values.then_some(self.max),
        }
    }

    fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.count = 0;
        self.sum = 0.0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Aggregation {
    Sum { value: f64, monotonic: bool },
    LastValue { value: f64, timestamp: u64 },
    Histogram(HistogramState),
    ExponentialHistogram(ExponentialHistogramState),
}

/// Aggregation state of one instrument + label set
#[derive(Debug, Clone)]
pub(crate) struct TimeSeries {
    aggregation: Aggregation,
    /// Series creation for cumulative, previous collection for delta
    start_time: u64,
    last_update: u64,
}

impl TimeSeries {
    pub(crate) fn new(kind: InstrumentKind, layout: &HistogramLayout, now: u64) -> Self {
        let aggregation = match kind {
            InstrumentKind::Counter => Aggregation::Sum {
                value: 0.0,
                monotonic: true,
            },
            InstrumentKind::UpDownCounter => Aggregation::Sum {
                value: 0.0,
                monotonic: false,
            },
            InstrumentKind::Gauge => Aggregation::LastValue {
                value: 0.0,
                timestamp: 0,
            },
            InstrumentKind::Histogram => match layout {
                HistogramLayout::Explicit(bounds) => Aggregation::Histogram(HistogramState::new(Arc::clone(bounds))),
                HistogramLayout::Exponential(limits) => {
                    Aggregation::ExponentialHistogram(ExponentialHistogramState::new(*limits))
                },
            },
        };

        Self {
            aggregation,
            start_time: now,
            last_update: now,
        }
    }

    /// Fold one measurement into the running state
    #[inline]
    pub(crate) fn update(&mut self, value: f64, timestamp: u64) {
        match &mut self.aggregation {
            Aggregation::Sum { value: sum, .. } => *sum += value,
            Aggregation::LastValue {
                value: last,
                timestamp: stored,
            } => {
                // Later arrival wins ties
                if timestamp >= *stored {
                    *last = value;
                    *stored = timestamp;
                }
            },
            Aggregation::Histogram(histogram) => histogram.update(value),
            Aggregation::ExponentialHistogram(histogram) => histogram.update(value),
        }
        self.last_update = self.last_update.max(timestamp);
    }

    pub(crate) fn start_time(&self) -> u64 {
        self.start_time
    }

    pub(crate) fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Current value without touching the state
    pub(crate) fn peek(&self) -> MetricValue {
        match &self.aggregation {
            Aggregation::Sum { value, monotonic } => MetricValue::Sum {
                value: *value,
                monotonic: *monotonic,
            },
            Aggregation::LastValue { value, .. } => MetricValue::Gauge { value: *value },
            Aggregation::Histogram(histogram) => histogram.snapshot(),
            Aggregation::ExponentialHistogram(histogram) => histogram.snapshot(),
        }
    }

    /// Snapshot for export. Delta temporality resets sums and buckets and
    /// starts a new window at `now`; gauges keep their last value.
    pub(crate) fn collect(&mut self, temporality: Temporality, now: u64) -> (u64, MetricValue) {
        let start = self.start_time;
        let value = self.peek();

        if temporality == Temporality::Delta {
            match &mut self.aggregation {
                Aggregation::Sum { value, .. } => *value = 0.0,
                Aggregation::LastValue { .. } => {},
                Aggregation::Histogram(histogram) => histogram.reset(),
                Aggregation::ExponentialHistogram(histogram) => histogram.reset(),
            }
            self.start_time = now;
        }

        (start, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(values: &[f64]) -> HistogramLayout {
        HistogramLayout::Explicit(Arc::from(values))
    }

    #[test]
    fn test_histogram_bucket_selection() {
        let mut series = TimeSeries::new(InstrumentKind::Histogram, &bounds(&[10.0, 100.0]), 0);
        for value in [5.0, 10.0, 50.0, 100.0, 500.0] {
            series.update(value, 1);
        }

        match series.peek() {
            MetricValue::Histogram {
                bucket_counts,
                count,
                sum,
                min,
                max,
                ..
            } => {
                // Bounds are inclusive upper limits
                assert_eq!(bucket_counts, vec![2, 2, 1]);
                assert_eq!(count, 5);
                assert_eq!(sum, 665.0);
                assert_eq!(min, Some(5.0));
                assert_eq!(max, Some(500.0));
            },
            other => panic!("Expected histogram, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_histogram_has_no_min_max() {
        let series = TimeSeries::new(InstrumentKind::Histogram, &bounds(&[1.0]), 0);
        match series.peek() {
            MetricValue::Histogram { min, max, count, .. } => {
                assert_eq!(count, 0);
                assert!(min.is_none() && max.is_none());
            },
            other => panic!("Expected histogram, got {:?}", other),
        }
    }

    #[test]
    fn test_gauge_keeps_latest_timestamp() {
        let mut series = TimeSeries::new(InstrumentKind::Gauge, &bounds(&[]), 0);
        series.update(1.0, 20);
        series.update(2.0, 10);
        assert_eq!(series.peek().as_f64(), Some(1.0));

        series.update(3.0, 20);
        assert_eq!(series.peek().as_f64(), Some(3.0));
    }

    #[test]
    fn test_delta_collect_resets_sum_and_moves_window() {
        let mut series = TimeSeries::new(InstrumentKind::Counter, &bounds(&[]), 100);
        series.update(4.0, 150);

        let (start, value) = series.collect(Temporality::Delta, 200);
        assert_eq!(start, 100);
        assert_eq!(value.as_f64(), Some(4.0));

        let (start, value) = series.collect(Temporality::Delta, 300);
        assert_eq!(start, 200);
        assert_eq!(value.as_f64(), Some(0.0));
    }

    #[test]
    fn test_cumulative_collect_keeps_state() {
        let mut series = TimeSeries::new(InstrumentKind::UpDownCounter, &bounds(&[]), 100);
        series.update(4.0, 150);
        series.update(-6.0, 160);

        let (_, first) = series.collect(Temporality::Cumulative, 200);
        let (start, second) = series.collect(Temporality::Cumulative, 300);
        assert_eq!(first, second);
        assert_eq!(start, 100);
        assert_eq!(
            second,
            MetricValue::Sum {
                value: -2.0,
                monotonic: false
            }
        );
    }

    #[test]
    fn test_exponential_delta_collect_resets_buckets() {
        let layout = HistogramLayout::Exponential(ExponentialBuckets::default());
        let mut series = TimeSeries::new(InstrumentKind::Histogram, &layout, 0);
        series.update(2.0, 1);
        series.update(0.0, 2);

        let (_, first) = series.collect(Temporality::Delta, 10);
        match first {
            MetricValue::ExponentialHistogram {
                count, zero_count, ..
            } => {
                assert_eq!(count, 2);
                assert_eq!(zero_count, 1);
            },
            other => panic!("Expected exponential histogram, got {:?}", other),
        }

        let (start, second) = series.collect(Temporality::Delta, 20);
        assert_eq!(start, 10);
        match second {
            MetricValue::ExponentialHistogram { count, scale, .. } => {
                assert_eq!(count, 0);
                assert_eq!(scale, 20);
            },
            other => panic!("Expected exponential histogram, got {:?}", other),
        }
    }
}
