//! Exporter contract.
//!
//! An exporter turns a [`Batch`] into whatever its backend needs. The batch
//! worker is its only caller, so `export` takes `&mut self` and is never
//! invoked concurrently on the same instance. Every call is bounded by the
//! worker's export timeout; a call that overruns is dropped (its future is
//! cancelled) and reported as a transient failure.

pub mod console;
pub mod in_memory;

pub use console::{ConsoleExporter, OutputFormat};
pub use in_memory::InMemoryExporter;

use crate::core::Batch;
use std::fmt;
use std::time::Duration;

/// How an export failed, which decides whether it is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network or backend hiccup; retried with backoff
    Transient,
    /// The backend rejected the batch for good; never retried
    Permanent,
    /// The backend asked us to slow down; retried after the given delay
    Throttled { retry_after: Duration },
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Permanent)
    }
}

/// Failure reported by an exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl fmt::Display for ExportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "transient failure: {}", self.reason),
            FailureKind::Permanent => write!(f, "permanent failure: {}", self.reason),
            FailureKind::Throttled { retry_after } => {
                write!(f, "throttled for {:?}: {}", retry_after, self.reason)
            },
        }
    }
}

/// Outcome of one export call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportResult {
    Success,
    Failure(ExportFailure),
}

impl ExportResult {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::failure(FailureKind::Transient, reason)
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::failure(FailureKind::Permanent, reason)
    }

    pub fn throttled(retry_after: Duration, reason: impl Into<String>) -> Self {
        Self::failure(FailureKind::Throttled { retry_after }, reason)
    }

    fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        ExportResult::Failure(ExportFailure {
            kind,
            reason: reason.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExportResult::Success)
    }
}

/// Backend adapter driven by the batch worker.
#[async_trait::async_trait]
pub trait Exporter: Send + 'static {
    /// Export one batch.
    async fn export(&mut self, batch: &Batch) -> ExportResult;

    /// Flush anything the exporter buffers internally.
    async fn force_flush(&mut self, _timeout: Duration) -> bool {
        true
    }

    /// Release resources. Called exactly once, after the final export.
    async fn shutdown(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn name(&self) -> &str;
}

#[async_trait::async_trait]
impl Exporter for Box<dyn Exporter> {
    async fn export(&mut self, batch: &Batch) -> ExportResult {
        (**self).export(batch).await
    }

    async fn force_flush(&mut self, timeout: Duration) -> bool {
        (**self).force_flush(timeout).await
    }

    async fn shutdown(&mut self, timeout: Duration) -> bool {
        (**self).shutdown(timeout).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
