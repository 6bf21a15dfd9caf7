//! Log records produced by logging instrumentation.
//!
//! Records carry optional trace/span ids so exporters can correlate them with
//! the span that was active when the log was emitted.

pub mod types;

pub use types::{LogRecord, LogSeverity};
