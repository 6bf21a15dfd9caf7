use crate::core::error::{PipelineError, Result};
use crate::logs::LogRecord;
use crate::metrics::MetricPoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Unique identifier for a trace (16 bytes, hex encoded on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId([u8; 16]);

/// Unique identifier for a span within a trace (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId([u8; 8]);

impl TraceId {
    /// Creates a TraceId from raw bytes; the all-zero id is invalid
    pub fn from_bytes(bytes: [u8; 16]) -> Result<Self> {
        if bytes == [0; 16] {
            return Err(PipelineError::invalid_id("TraceId cannot be all zeros"));
        }
        Ok(TraceId(bytes))
    }

    /// Parses a 32 character lowercase or uppercase hex string
    pub fn from_hex(id: &str) -> Result<Self> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(id, &mut bytes).map_err(|e| {
            PipelineError::invalid_id(format!("TraceId must be 32 hex characters: {}", e))
        })?;
        Self::from_bytes(bytes)
    }

    /// Generates a random, valid trace id
    pub fn random() -> Self {
        loop {
            let bytes: [u8; 16] = rand::random();
            if bytes != [0; 16] {
                return TraceId(bytes);
            }
        }
    }

    /// Returns the raw bytes
    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl SpanId {
    /// Creates a SpanId from raw bytes; the all-zero id is invalid
    pub fn from_bytes(bytes: [u8; 8]) -> Result<Self> {
        if bytes == [0; 8] {
            return Err(PipelineError::invalid_id("SpanId cannot be all zeros"));
        }
        Ok(SpanId(bytes))
    }

    /// Parses a 16 character hex string
    pub fn from_hex(id: &str) -> Result<Self> {
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(id, &mut bytes).map_err(|e| {
            PipelineError::invalid_id(format!("SpanId must be 16 hex characters: {}", e))
        })?;
        Self::from_bytes(bytes)
    }

    /// Generates a random, valid span id
    pub fn random() -> Self {
        loop {
            let bytes: [u8; 8] = rand::random();
            if bytes != [0; 8] {
                return SpanId(bytes);
            }
        }
    }

    /// Returns the raw bytes
    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_serde!(TraceId);
hex_serde!(SpanId);

/// Key-value attributes. Keys are unique and iterate in sorted order, so the
/// same set of pairs always produces the same label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    /// Creates an empty attribute set
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an attribute, returning the previous value
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    /// Gets an attribute value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no attributes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates attributes in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Attributes(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Attributes {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Role of a span in the interaction it records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// Status of a span execution
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpanStatus {
    /// No status was set by instrumentation
    #[default]
    Unset,
    /// Span completed successfully
    Ok,
    /// Span completed with an error
    Error(String),
}

impl SpanStatus {
    /// Returns true if the span status indicates an error
    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error(_))
    }
}

/// A finished span, created by instrumentation when the span ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    /// Start timestamp in nanoseconds since Unix epoch
    pub start_time: u64,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub status: SpanStatus,
    pub attributes: Attributes,
}

impl SpanRecord {
    /// Creates a new span builder
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    /// End timestamp in nanoseconds
    pub fn end_time(&self) -> u64 {
        let duration = u64::try_from(self.duration.as_nanos()).unwrap_or(u64::MAX);
        self.start_time.saturating_add(duration)
    }

    /// Returns true if this span is a root span (has no parent)
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

/// Builder for creating SpanRecord instances
#[derive(Default)]
pub struct SpanBuilder {
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    parent_span_id: Option<SpanId>,
    name: Option<String>,
    kind: SpanKind,
    start_time: Option<u64>,
    duration: Duration,
    status: SpanStatus,
    attributes: Attributes,
}

impl SpanBuilder {
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    pub fn parent_span_id(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn start_time(mut self, nanos: u64) -> Self {
        self.start_time = Some(nanos);
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    pub fn attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Builds the span. Missing ids are generated; a name is required.
    pub fn build(self) -> Result<SpanRecord> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PipelineError::invalid_id("span name is required"))?;

        Ok(SpanRecord {
            trace_id: self.trace_id.unwrap_or_else(TraceId::random),
            span_id: self.span_id.unwrap_or_else(SpanId::random),
            parent_span_id: self.parent_span_id,
            name,
            kind: self.kind,
            start_time: self.start_time.unwrap_or_else(crate::core::time::now_nanos),
            duration: self.duration,
            status: self.status,
            attributes: self.attributes,
        })
    }
}

/// Kind tag of a telemetry item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Span,
    Metric,
    Log,
}

impl TelemetryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::Span => "span",
            TelemetryKind::Metric => "metric",
            TelemetryKind::Log => "log",
        }
    }
}

/// Immutable record handed to the pipeline at the moment of completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TelemetryItem {
    Span(SpanRecord),
    Metric(MetricPoint),
    Log(LogRecord),
}

impl TelemetryItem {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetryItem::Span(_) => TelemetryKind::Span,
            TelemetryItem::Metric(_) => TelemetryKind::Metric,
            TelemetryItem::Log(_) => TelemetryKind::Log,
        }
    }

    /// Completion timestamp in nanoseconds (span end, point time, log time)
    pub fn timestamp(&self) -> u64 {
        match self {
            TelemetryItem::Span(span) => span.end_time(),
            TelemetryItem::Metric(point) => point.time,
            TelemetryItem::Log(log) => log.timestamp,
        }
    }

    pub fn attributes(&self) -> &Attributes {
        match self {
            TelemetryItem::Span(span) => &span.attributes,
            TelemetryItem::Metric(point) => &point.attributes,
            TelemetryItem::Log(log) => &log.attributes,
        }
    }
}

impl From<SpanRecord> for TelemetryItem {
    fn from(span: SpanRecord) -> Self {
        TelemetryItem::Span(span)
    }
}

impl From<MetricPoint> for TelemetryItem {
    fn from(point: MetricPoint) -> Self {
        TelemetryItem::Metric(point)
    }
}

impl From<LogRecord> for TelemetryItem {
    fn from(log: LogRecord) -> Self {
        TelemetryItem::Log(log)
    }
}

/// Ordered group of items handed to an exporter in one call.
#[derive(Debug, Clone)]
pub struct Batch {
    items: Vec<TelemetryItem>,
    created_at: Instant,
}

impl Batch {
    pub fn new(items: Vec<TelemetryItem>) -> Self {
        Self {
            items,
            created_at: Instant::now(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, item: TelemetryItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TelemetryItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[TelemetryItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<TelemetryItem> {
        self.items
    }

    /// Age of the batch since it was started
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Number of items of the given kind
    pub fn count_by_kind(&self, kind: TelemetryKind) -> usize {
        self.items.iter().filter(|item| item.kind() == kind).count()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a TelemetryItem;
    type IntoIter = std::slice::Iter<'a, TelemetryItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogSeverity;

    #[test]
    fn test_trace_id_validation() {
        assert!(TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").is_ok());
        assert!(TraceId::from_hex("00000000000000000000000000000000").is_err());
        assert!(TraceId::from_hex("4bf92f").is_err());
        assert!(TraceId::from_hex("zz").is_err());
    }

    #[test]
    fn test_span_id_hex_round_trip() {
        let id = SpanId::from_hex("00f067aa0ba902b7").unwrap();
        assert_eq!(id.to_string(), "00f067aa0ba902b7");
    }

    #[test]
    fn test_span_builder() {
        let span = SpanRecord::builder()
            .name("GET /users")
            .kind(SpanKind::Server)
            .start_time(1_000)
            .duration(Duration::from_nanos(500))
            .attribute("http.method", "GET")
            .build()
            .unwrap();

        assert_eq!(span.name, "GET /users");
        assert_eq!(span.end_time(), 1_500);
        assert!(span.is_root());
        assert_eq!(span.attributes.get("http.method"), Some("GET"));
    }

    #[test]
    fn test_span_builder_requires_name() {
        assert!(SpanRecord::builder().build().is_err());
    }

    #[test]
    fn test_attributes_are_order_independent() {
        let a = Attributes::from([("b", "2"), ("a", "1")]);
        let b = Attributes::new().with("a", "1").with("b", "2");
        assert_eq!(a, b);
        let keys: Vec<&str> = a.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_attributes_keys_unique() {
        let mut attrs = Attributes::new();
        attrs.insert("k", "v1");
        assert_eq!(attrs.insert("k", "v2"), Some("v1".to_string()));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_item_kind_and_timestamp() {
        let log = LogRecord::new(42, LogSeverity::Warn, "disk almost full");
        let item = TelemetryItem::from(log);
        assert_eq!(item.kind(), TelemetryKind::Log);
        assert_eq!(item.timestamp(), 42);
    }

    #[test]
    fn test_batch_count_by_kind() {
        let mut batch = Batch::with_capacity(2);
        batch.push(LogRecord::new(1, LogSeverity::Info, "a").into());
        batch.push(
            SpanRecord::builder()
                .name("op")
                .build()
                .unwrap()
                .into(),
        );
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.count_by_kind(TelemetryKind::Log), 1);
        assert_eq!(batch.count_by_kind(TelemetryKind::Metric), 0);
    }

    #[test]
    fn test_span_serializes_ids_as_hex() {
        let span = SpanRecord::builder()
            .trace_id(TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap())
            .span_id(SpanId::from_hex("00f067aa0ba902b7").unwrap())
            .name("op")
            .build()
            .unwrap();
        let json = serde_json::to_value(TelemetryItem::Span(span)).unwrap();
        assert_eq!(json["type"], "span");
        assert_eq!(json["trace_id"], "4bf92f3577b34da6a3ce929d0e0e4736");
    }
}
