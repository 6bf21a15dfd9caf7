//! Typed instrument handles handed out to measurement sites.

use crate::core::{Attributes, Result};
use crate::metrics::exponential::ExponentialBuckets;
use crate::metrics::store::{AggregationStore, Instrument, InstrumentDescriptor};
use crate::metrics::types::{InstrumentKind, Temporality};
use std::sync::Arc;

/// Creates instruments backed by one aggregation store.
#[derive(Debug, Clone)]
pub struct Meter {
    store: Arc<AggregationStore>,
}

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident, $method:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            instrument: Arc<Instrument>,
        }

        impl $name {
            /// Record a measurement. Invalid values are counted and dropped.
            #[inline]
            pub fn $method(&self, value: f64, attributes: &Attributes) {
                self.instrument.record(value, attributes);
            }

            /// Record a measurement with an explicit timestamp in nanoseconds
            pub fn record_at(&self, value: f64, attributes: &Attributes, timestamp: u64) -> bool {
                self.instrument.record_at(value, attributes, timestamp)
            }

            pub fn name(&self) -> &str {
                self.instrument.name()
            }
        }
    };
}

handle!(
    /// Monotonic sum; negative increments are rejected
    Counter,
    add
);
handle!(
    /// Sum that may decrease
    UpDownCounter,
    add
);
handle!(
    /// Last recorded value wins
    Gauge,
    record
);
handle!(
    /// Distribution over explicit or exponential buckets
    Histogram,
    record
);

impl Meter {
    pub fn new(store: Arc<AggregationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<AggregationStore> {
        &self.store
    }

    /// Register an instrument from a full descriptor
    pub fn register(&self, descriptor: InstrumentDescriptor) -> Result<Arc<Instrument>> {
        self.store.register(descriptor)
    }

    pub fn counter(&self, name: impl Into<String>) -> Result<Counter> {
        let instrument = self.register(InstrumentDescriptor::new(name, InstrumentKind::Counter))?;
        Ok(Counter { instrument })
    }

    /// Counter reporting increments since the previous collection
    pub fn delta_counter(&self, name: impl Into<String>) -> Result<Counter> {
        let descriptor = InstrumentDescriptor::new(name, InstrumentKind::Counter)
            .with_temporality(Temporality::Delta);
        Ok(Counter {
            instrument: self.register(descriptor)?,
        })
    }

    pub fn up_down_counter(&self, name: impl Into<String>) -> Result<UpDownCounter> {
        let instrument =
            self.register(InstrumentDescriptor::new(name, InstrumentKind::UpDownCounter))?;
        Ok(UpDownCounter { instrument })
    }

    pub fn gauge(&self, name: impl Into<String>) -> Result<Gauge> {
        let instrument = self.register(InstrumentDescriptor::new(name, InstrumentKind::Gauge))?;
        Ok(Gauge { instrument })
    }

    /// Histogram with the default bucket boundaries
    pub fn histogram(&self, name: impl Into<String>) -> Result<Histogram> {
        let instrument =
            self.register(InstrumentDescriptor::new(name, InstrumentKind::Histogram))?;
        Ok(Histogram { instrument })
    }

    pub fn histogram_with_bounds(
        &self,
        name: impl Into<String>,
        bounds: Vec<f64>,
    ) -> Result<Histogram> {
        let descriptor =
            InstrumentDescriptor::new(name, InstrumentKind::Histogram).with_bounds(bounds);
        Ok(Histogram {
            instrument: self.register(descriptor)?,
        })
    }

    /// Histogram over base-2 exponential buckets (160 buckets, scale 20)
    pub fn exponential_histogram(&self, name: impl Into<String>) -> Result<Histogram> {
        self.exponential_histogram_with(name, ExponentialBuckets::default())
    }

    pub fn exponential_histogram_with(
        &self,
        name: impl Into<String>,
        buckets: ExponentialBuckets,
    ) -> Result<Histogram> {
        let descriptor = InstrumentDescriptor::new(name, InstrumentKind::Histogram)
            .with_exponential_buckets(buckets);
        Ok(Histogram {
            instrument: self.register(descriptor)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::MetricValue;

    fn meter() -> Meter {
        Meter::new(Arc::new(
            AggregationStore::new(Temporality::Cumulative, 100).unwrap(),
        ))
    }

    #[test]
    fn test_handles_share_instrument_by_name() {
        let meter = meter();
        let a = meter.counter("jobs").unwrap();
        let b = meter.counter("jobs").unwrap();
        a.add(1.0, &Attributes::new());
        b.add(2.0, &Attributes::new());

        let points = meter.store().collect_points(1);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value.as_f64(), Some(3.0));
    }

    #[test]
    fn test_kind_conflict_is_rejected() {
        let meter = meter();
        meter.gauge("temperature").unwrap();
        assert!(meter.counter("temperature").is_err());
    }

    #[test]
    fn test_histogram_with_bounds() {
        let meter = meter();
        let histogram = meter.histogram_with_bounds("rtt", vec![1.0, 2.0]).unwrap();
        histogram.record(1.5, &Attributes::new());

        let points = meter.store().collect_points(1);
        match &points[0].value {
            MetricValue::Histogram { bucket_counts, .. } => assert_eq!(bucket_counts, &vec![0, 1, 0]),
            other => panic!("Expected histogram, got {:?}", other),
        }
    }

    #[test]
    fn test_exponential_histogram_scales_down() {
        let meter = meter();
        let histogram = meter
            .exponential_histogram_with(
                "payload",
                ExponentialBuckets {
                    max_size: 8,
                    max_scale: 4,
                },
            )
            .unwrap();
        for value in [1.0, 1_000.0, 1_000_000.0, -5.0] {
            histogram.record(value, &Attributes::new());
        }

        let points = meter.store().collect_points(1);
        match &points[0].value {
            MetricValue::ExponentialHistogram {
                scale,
                positive_bucket_counts,
                negative_bucket_counts,
                count,
                ..
            } => {
                assert!(*scale < 4);
                assert!(positive_bucket_counts.len() <= 8);
                assert_eq!(positive_bucket_counts.iter().sum::<u64>(), 3);
                assert_eq!(negative_bucket_counts.iter().sum::<u64>(), 1);
                assert_eq!(*count, 4);
            },
            other => panic!("Expected exponential histogram, got {:?}", other),
        }
    }
}
