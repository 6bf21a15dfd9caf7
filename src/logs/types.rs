//! Log data types and structures

use crate::core::{Attributes, SpanId, TraceId, TraceContext};
use serde::{Deserialize, Serialize};

/// Log severity levels, numbered as in the OpenTelemetry log data model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogSeverity {
    Trace = 1,
    Debug = 5,
    Info = 9,
    Warn = 13,
    Error = 17,
    Fatal = 21,
}

impl LogSeverity {
    /// Convert from OTLP severity number
    pub fn from_otlp(severity: i32) -> Self {
        match severity {
            1..=4 => Self::Trace,
            5..=8 => Self::Debug,
            9..=12 => Self::Info,
            13..=16 => Self::Warn,
            17..=20 => Self::Error,
            21..=24 => Self::Fatal,
            _ => Self::Info, // Default
        }
    }

    /// OTLP severity number
    pub fn as_otlp(self) -> i32 {
        i32::from(self as u8)
    }

    /// Get display string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl From<tracing::Level> for LogSeverity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// A single emitted log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in nanoseconds
    pub timestamp: u64,
    /// Log severity level
    pub severity: LogSeverity,
    /// Log message body
    pub body: String,
    /// Optional trace ID for correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    /// Optional span ID for correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<SpanId>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl LogRecord {
    pub fn new<S: Into<String>>(timestamp: u64, severity: LogSeverity, body: S) -> Self {
        Self {
            timestamp,
            severity,
            body: body.into(),
            trace_id: None,
            span_id: None,
            attributes: Attributes::new(),
        }
    }

    /// Set trace ID for correlation
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Set span ID for correlation
    pub fn with_span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Correlate with both ids of an explicit trace context
    pub fn with_context(self, context: &TraceContext) -> Self {
        self.with_trace_id(context.trace_id)
            .with_span_id(context.span_id)
    }

    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// True when the record is correlated with a span
    pub fn is_correlated(&self) -> bool {
        self.trace_id.is_some() && self.span_id.is_some()
    }
}
