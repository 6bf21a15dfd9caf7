//! Core domain models and shared infrastructure.
//!
//! This module contains the telemetry data model plus the pieces every other
//! module leans on: errors, configuration, retry policy, self-diagnostics,
//! execution context and logging bootstrap.

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod retry;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use config::{BatchConfig, Config, ConfigBuilder, LogLevel, LoggingConfig, MetricsConfig};
pub use context::{
    current_trace_context, is_suppressed, suppressed, with_trace_context, SuppressionGuard,
    TraceContext,
};
pub use diagnostics::DiagnosticsLog;
pub use error::{PipelineError, Result};
pub use retry::{Backoff, ConstantBackoff, ExponentialBackoff, RetryConfig};
pub use types::{
    Attributes, Batch, SpanBuilder, SpanId, SpanKind, SpanRecord, SpanStatus, TelemetryItem,
    TelemetryKind, TraceId,
};
