//! Telepipe - bounded, lossy-by-design telemetry pipeline.
//!
//! Telepipe sits between high-frequency instrumentation call sites and slow,
//! failure-prone exporters. Producers never block: spans, log records and
//! metric points go into a fixed-size ring buffer and a single background
//! worker exports them in batches, retrying transient failures within a
//! budget and dropping what it cannot deliver.
//!
//! # Features
//!
//! - **Bounded ring buffer**: lock-free MPMC queue, drop-newest on overflow
//! - **Batch export**: on batch size, timer, force flush and shutdown
//! - **Retry with backoff**: exponential or constant, server throttling honoured
//! - **Metric aggregation**: counters, gauges, explicit and base-2 exponential
//!   histograms with cardinality limits
//! - **Feedback-loop safety**: export runs in a suppression scope
//!
//! # Architecture
//!
//! - `buffer`: the ring buffer
//! - `pipeline`: accumulator, batch scheduler, processors and the host facade
//! - `export`: exporter contract and the bundled exporters
//! - `metrics`: instruments, aggregation store and collector
//! - `logs`: log records
//! - `bridge`: `tracing` layer feeding log records into a pipeline
//! - `core`: types, errors, configuration, retry, diagnostics and context
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use telepipe_lib::core::{Attributes, Config};
//! use telepipe_lib::export::ConsoleExporter;
//! use telepipe_lib::logs::{LogRecord, LogSeverity};
//! use telepipe_lib::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(ConsoleExporter::stdout(), Config::default())?;
//!
//!     pipeline.submit(LogRecord::new(0, LogSeverity::Info, "started"));
//!     let requests = pipeline.meter().counter("http.requests")?;
//!     requests.add(1.0, &Attributes::new().with("route", "/"));
//!
//!     pipeline.shutdown(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod buffer;
pub mod cli;
pub mod core;
pub mod export;
pub mod logs;
pub mod metrics;
pub mod pipeline;

// Re-export core types for convenience
pub use crate::core::{Config, PipelineError, Result};
pub use crate::pipeline::{Pipeline, SubmitStatus};
