//! Keyed time-series store reducing raw measurements into one point per
//! instrument and label set each collection cycle.
//!
//! Instruments live in a `DashMap` by name; each instrument owns its own
//! `DashMap` of label set to series so that the hot path looks up a borrowed
//! `&Attributes` without allocating. A series is guarded by its own mutex, so
//! concurrent `record` calls only contend when they hit the same label set.

use crate::core::time::now_nanos;
use crate::core::{
    Attributes, Batch, DiagnosticsLog, PipelineError, Result, SuppressionGuard, TelemetryItem,
};
use crate::metrics::aggregation::{HistogramLayout, TimeSeries};
use crate::metrics::exponential::ExponentialBuckets;
use crate::metrics::types::{
    InstrumentKind, MetricPoint, MetricValue, Temporality, DEFAULT_HISTOGRAM_BOUNDS,
    OVERFLOW_ATTRIBUTE,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

type SeriesMap = DashMap<Attributes, Mutex<TimeSeries>, ahash::RandomState>;

/// Identity of one time series: instrument name plus canonical label set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeSeriesKey {
    pub instrument: String,
    pub attributes: Attributes,
}

impl TimeSeriesKey {
    pub fn new(instrument: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            instrument: instrument.into(),
            attributes,
        }
    }
}

/// Static description of an instrument
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentDescriptor {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub kind: InstrumentKind,
    /// `None` uses the store's default temporality
    pub temporality: Option<Temporality>,
    /// Histogram boundaries; `None` uses the defaults
    pub bounds: Option<Vec<f64>>,
    /// Base-2 exponential buckets instead of explicit bounds
    pub exponential: Option<ExponentialBuckets>,
}

impl InstrumentDescriptor {
    pub fn new(name: impl Into<String>, kind: InstrumentKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            kind,
            temporality: None,
            bounds: None,
            exponential: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = Some(temporality);
        self
    }

    pub fn with_bounds(mut self, bounds: Vec<f64>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Aggregate into base-2 exponential buckets
    pub fn with_exponential_buckets(mut self, buckets: ExponentialBuckets) -> Self {
        self.exponential = Some(buckets);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::config("instrument name must not be empty"));
        }

        if let Some(bounds) = &self.bounds {
            if bounds.iter().any(|b| !b.is_finite()) {
                return Err(PipelineError::config(format!(
                    "histogram '{}' bounds must be finite",
                    self.name
                )));
            }
            if bounds.windows(2).any(|w| w[0] >= w[1]) {
                return Err(PipelineError::config(format!(
                    "histogram '{}' bounds must be strictly increasing",
                    self.name
                )));
            }
        }

        if let Some(buckets) = &self.exponential {
            if self.kind != InstrumentKind::Histogram {
                return Err(PipelineError::config(format!(
                    "exponential buckets require a histogram, '{}' is a {}",
                    self.name,
                    self.kind.as_str()
                )));
            }
            if self.bounds.is_some() {
                return Err(PipelineError::config(format!(
                    "histogram '{}' cannot use both explicit bounds and exponential buckets",
                    self.name
                )));
            }
            buckets.validate()?;
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct StoreCounters {
    recorded: AtomicU64,
    dropped_measurements: AtomicU64,
    overflowed_measurements: AtomicU64,
}

/// A registered instrument and all of its series
pub struct Instrument {
    name: String,
    description: String,
    unit: String,
    kind: InstrumentKind,
    temporality: Temporality,
    layout: HistogramLayout,
    series: SeriesMap,
    /// Distinct label sets admitted, excluding the overflow series
    series_count: AtomicUsize,
    max_series: usize,
    overflow_reported: AtomicBool,
    counters: Arc<StoreCounters>,
    diagnostics: Option<Arc<DiagnosticsLog>>,
}

impl Instrument {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn temporality(&self) -> Temporality {
        self.temporality
    }

    /// Number of live series including the overflow series
    pub fn series_len(&self) -> usize {
        self.series.len()
    }

    /// Record one measurement at the current time
    #[inline]
    pub fn record(&self, value: f64, attributes: &Attributes) -> bool {
        self.record_at(value, attributes, now_nanos())
    }

    /// Record one measurement with an explicit timestamp (nanoseconds).
    ///
    /// Returns false when the measurement is rejected; rejections are counted
    /// in `dropped_measurements` and never surface as errors.
    pub fn record_at(&self, value: f64, attributes: &Attributes, timestamp: u64) -> bool {
        if !self.accepts(value) {
            self.counters
                .dropped_measurements
                .fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if let Some(series) = self.series.get(attributes) {
            series.lock().update(value, timestamp);
        } else {
            self.insert_series(value, attributes, timestamp);
        }

        self.counters.recorded.fetch_add(1, Ordering::Relaxed);
        true
    }

    #[inline]
    fn accepts(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        !(self.kind == InstrumentKind::Counter && value < 0.0)
    }

    #[cold]
    fn insert_series(&self, value: f64, attributes: &Attributes, timestamp: u64) {
        match self.series.entry(attributes.clone()) {
            Entry::Occupied(entry) => entry.get().lock().update(value, timestamp),
            Entry::Vacant(entry) => {
                if self.reserve_series() {
                    let mut series = TimeSeries::new(self.kind, &self.layout, timestamp);
                    series.update(value, timestamp);
                    entry.insert(Mutex::new(series));
                } else {
                    // Release the shard lock before touching the overflow entry
                    drop(entry);
                    self.record_overflow(value, timestamp);
                }
            },
        }
    }

    fn reserve_series(&self) -> bool {
        self.series_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max_series).then_some(count + 1)
            })
            .is_ok()
    }

    fn record_overflow(&self, value: f64, timestamp: u64) {
        self.counters
            .overflowed_measurements
            .fetch_add(1, Ordering::Relaxed);

        if !self.overflow_reported.swap(true, Ordering::Relaxed) {
            let message = format!(
                "instrument '{}' reached {} series; further label sets are aggregated under {}=true",
                self.name, self.max_series, OVERFLOW_ATTRIBUTE
            );
            match &self.diagnostics {
                Some(log) => log.warn("cardinality", message),
                None => {
                    let _guard = SuppressionGuard::enter();
                    tracing::warn!("{}", message);
                },
            }
        }

        let key = Attributes::new().with(OVERFLOW_ATTRIBUTE, "true");
        self.series
            .entry(key)
            .or_insert_with(|| Mutex::new(TimeSeries::new(self.kind, &self.layout, timestamp)))
            .lock()
            .update(value, timestamp);
    }

    /// Current value and last update time of one series, without collecting
    pub fn peek(&self, attributes: &Attributes) -> Option<(MetricValue, u64)> {
        self.series.get(attributes).map(|series| {
            let series = series.lock();
            (series.peek(), series.last_update())
        })
    }

    fn collect_into(&self, now: u64, points: &mut Vec<MetricPoint>) {
        for entry in self.series.iter() {
            let (start_time, value) = entry.value().lock().collect(self.temporality, now);
            points.push(MetricPoint {
                name: self.name.clone(),
                description: self.description.clone(),
                unit: self.unit.clone(),
                kind: self.kind,
                temporality: self.temporality,
                start_time,
                time: now,
                attributes: entry.key().clone(),
                value,
            });
        }
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("temporality", &self.temporality)
            .field("series", &self.series.len())
            .finish()
    }
}

/// Counters exposed by [`AggregationStore::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct StoreStats {
    pub instruments: usize,
    pub series: usize,
    pub recorded_measurements: u64,
    pub dropped_measurements: u64,
    pub overflowed_measurements: u64,
    pub collections: u64,
}

/// Mapping from instrument + label set to running aggregation state
pub struct AggregationStore {
    instruments: DashMap<String, Arc<Instrument>, ahash::RandomState>,
    default_temporality: Temporality,
    max_series_per_instrument: usize,
    counters: Arc<StoreCounters>,
    collections: AtomicU64,
    diagnostics: Option<Arc<DiagnosticsLog>>,
}

impl AggregationStore {
    /// Create a store. A zero cardinality limit is a configuration error.
    pub fn new(default_temporality: Temporality, max_series_per_instrument: usize) -> Result<Self> {
        if max_series_per_instrument == 0 {
            return Err(PipelineError::config(
                "max_series_per_instrument must be greater than 0",
            ));
        }

        Ok(Self {
            instruments: DashMap::with_hasher(ahash::RandomState::new()),
            default_temporality,
            max_series_per_instrument,
            counters: Arc::new(StoreCounters::default()),
            collections: AtomicU64::new(0),
            diagnostics: None,
        })
    }

    /// Route cardinality warnings through a diagnostics log
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticsLog>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Register an instrument, or return the existing one with the same name.
    ///
    /// Re-registering a name with a different kind is a configuration error.
    pub fn register(&self, descriptor: InstrumentDescriptor) -> Result<Arc<Instrument>> {
        descriptor.validate()?;

        match self.instruments.entry(descriptor.name.clone()) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if existing.kind != descriptor.kind {
                    return Err(PipelineError::config(format!(
                        "instrument '{}' is already registered as {}, cannot register as {}",
                        descriptor.name,
                        existing.kind.as_str(),
                        descriptor.kind.as_str()
                    )));
                }
                Ok(Arc::clone(existing))
            },
            Entry::Vacant(entry) => {
                let layout = match (descriptor.exponential, descriptor.bounds) {
                    (Some(buckets), _) => HistogramLayout::Exponential(buckets),
                    (None, Some(bounds)) => HistogramLayout::Explicit(Arc::from(bounds)),
                    (None, None) => HistogramLayout::Explicit(Arc::from(&DEFAULT_HISTOGRAM_BOUNDS[..])),
                };

                let instrument = Arc::new(Instrument {
                    name: descriptor.name,
                    description: descriptor.description,
                    unit: descriptor.unit,
                    kind: descriptor.kind,
                    temporality: descriptor.temporality.unwrap_or(self.default_temporality),
                    layout,
                    series: DashMap::with_hasher(ahash::RandomState::new()),
                    series_count: AtomicUsize::new(0),
                    max_series: self.max_series_per_instrument,
                    overflow_reported: AtomicBool::new(false),
                    counters: Arc::clone(&self.counters),
                    diagnostics: self.diagnostics.as_ref().map(Arc::clone),
                });

                let _guard = SuppressionGuard::enter();
                tracing::debug!(
                    instrument = %instrument.name,
                    kind = instrument.kind.as_str(),
                    "registered instrument"
                );
                entry.insert(Arc::clone(&instrument));
                Ok(instrument)
            },
        }
    }

    pub fn instrument(&self, name: &str) -> Option<Arc<Instrument>> {
        self.instruments.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Record a measurement against a registered instrument by name.
    ///
    /// Unknown instruments count as dropped measurements.
    pub fn record(&self, instrument: &str, value: f64, attributes: &Attributes) -> bool {
        self.record_at(instrument, value, attributes, now_nanos())
    }

    pub fn record_at(&self, instrument: &str, value: f64, attributes: &Attributes, timestamp: u64) -> bool {
        match self.instruments.get(instrument) {
            Some(entry) => entry.value().record_at(value, attributes, timestamp),
            None => {
                self.counters
                    .dropped_measurements
                    .fetch_add(1, Ordering::Relaxed);
                false
            },
        }
    }

    /// Current value of one series without collecting it
    pub fn peek(&self, key: &TimeSeriesKey) -> Option<MetricValue> {
        self.instruments
            .get(&key.instrument)
            .and_then(|instrument| instrument.peek(&key.attributes))
            .map(|(value, _)| value)
    }

    /// One point per live series, stamped with `timestamp`
    pub fn collect_points(&self, timestamp: u64) -> Vec<MetricPoint> {
        let instruments: Vec<Arc<Instrument>> = self
            .instruments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut points = Vec::new();
        for instrument in instruments {
            instrument.collect_into(timestamp, &mut points);
        }

        self.collections.fetch_add(1, Ordering::Relaxed);
        points
    }

    /// Snapshot every live series into a batch of metric items
    pub fn collect(&self, timestamp: u64) -> Batch {
        Batch::new(
            self.collect_points(timestamp)
                .into_iter()
                .map(TelemetryItem::Metric)
                .collect(),
        )
    }

    /// Measurements rejected as invalid or unroutable
    pub fn dropped_measurements(&self) -> u64 {
        self.counters.dropped_measurements.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            instruments: self.instruments.len(),
            series: self
                .instruments
                .iter()
                .map(|entry| entry.value().series_len())
                .sum(),
            recorded_measurements: self.counters.recorded.load(Ordering::Relaxed),
            dropped_measurements: self.dropped_measurements(),
            overflowed_measurements: self.counters.overflowed_measurements.load(Ordering::Relaxed),
            collections: self.collections.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for AggregationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationStore")
            .field("instruments", &self.instruments.len())
            .field("default_temporality", &self.default_temporality)
            .field("max_series_per_instrument", &self.max_series_per_instrument)
            .finish()
    }
}
