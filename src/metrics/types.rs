//! Metric data model: instrument kinds, temporality and exported points.

use crate::core::Attributes;
use serde::{Deserialize, Serialize};

/// Default explicit bucket boundaries for histograms
pub const DEFAULT_HISTOGRAM_BOUNDS: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0,
    7500.0, 10000.0,
];

/// Attribute key marking the series that absorbs label sets past the cardinality limit
pub const OVERFLOW_ATTRIBUTE: &str = "otel.metric.overflow";

/// Kind of instrument, which decides the aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Monotonically increasing sum (requests, errors)
    Counter,
    /// Sum that may go up and down (queue depth, active connections)
    UpDownCounter,
    /// Last value wins (CPU usage, temperature)
    Gauge,
    /// Distribution over explicit or base-2 exponential buckets (latency, payload size)
    Histogram,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::UpDownCounter => "up_down_counter",
            InstrumentKind::Gauge => "gauge",
            InstrumentKind::Histogram => "histogram",
        }
    }
}

/// Whether snapshots report totals since start or increments since the last collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    #[default]
    Cumulative,
    Delta,
}

/// Aggregated value carried by a [`MetricPoint`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Sum {
        value: f64,
        monotonic: bool,
    },
    Gauge {
        value: f64,
    },
    Histogram {
        bounds: Vec<f64>,
        /// One count per bound plus the overflow bucket
        bucket_counts: Vec<u64>,
        count: u64,
        sum: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Base-2 exponential buckets; bucket `offset + i` covers
    /// `(base^(offset+i), base^(offset+i+1)]` with `base = 2^(2^-scale)`
    ExponentialHistogram {
        scale: i32,
        zero_count: u64,
        positive_offset: i32,
        positive_bucket_counts: Vec<u64>,
        negative_offset: i32,
        negative_bucket_counts: Vec<u64>,
        count: u64,
        sum: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
}

impl MetricValue {
    /// Scalar value of sums and gauges
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Sum { value, .. } | MetricValue::Gauge { value } => Some(*value),
            MetricValue::Histogram { .. } | MetricValue::ExponentialHistogram { .. } => None,
        }
    }
}

/// One aggregated snapshot for an instrument and label set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    pub kind: InstrumentKind,
    pub temporality: Temporality,
    /// Start of the aggregation window in nanoseconds
    pub start_time: u64,
    /// Collection time in nanoseconds
    pub time: u64,
    pub attributes: Attributes,
    pub value: MetricValue,
}

impl MetricPoint {
    /// True when this point belongs to the cardinality overflow series
    pub fn is_overflow(&self) -> bool {
        self.attributes.get(OVERFLOW_ATTRIBUTE) == Some("true")
    }
}
