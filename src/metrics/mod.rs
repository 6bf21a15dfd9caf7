//! Metric instruments and the aggregation store.
//!
//! Measurements never travel through the ring buffer one by one. They are
//! folded into per-series aggregation state by the [`AggregationStore`], and
//! each collection cycle turns every live series into a single
//! [`MetricPoint`] that enters the batch path like any other item.

pub(crate) mod aggregation;
pub mod collector;
pub mod exponential;
pub mod instrument;
pub mod store;
pub mod types;

pub use collector::{collect_and_submit, MetricsCollector};
pub use exponential::ExponentialBuckets;
pub use instrument::{Counter, Gauge, Histogram, Meter, UpDownCounter};
pub use store::{AggregationStore, Instrument, InstrumentDescriptor, StoreStats, TimeSeriesKey};
pub use types::{
    InstrumentKind, MetricPoint, MetricValue, Temporality, DEFAULT_HISTOGRAM_BOUNDS, OVERFLOW_ATTRIBUTE,
};
