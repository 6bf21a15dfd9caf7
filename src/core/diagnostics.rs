//! Self-diagnostics: a bounded in-memory log of pipeline events.
//!
//! Everything recorded here is also emitted through `tracing`, always inside a
//! suppression scope so the `tracing` bridge cannot feed it back into the
//! pipeline being diagnosed.

use crate::core::context::SuppressionGuard;
use crate::core::PipelineError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Severity of a diagnostic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

/// A single diagnostic occurrence
#[derive(Debug, Clone)]
pub struct DiagnosticEntry {
    /// When the event occurred
    pub timestamp: Instant,
    pub level: DiagnosticLevel,
    /// Event category (`overflow`, `export`, `lifecycle`, ...)
    pub category: &'static str,
    pub message: String,
}

/// Point-in-time view of the diagnostics log
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    pub total: u64,
    pub by_category: HashMap<&'static str, u64>,
    pub recent: Vec<DiagnosticEntry>,
}

struct Inner {
    recent: VecDeque<DiagnosticEntry>,
    by_category: HashMap<&'static str, u64>,
}

/// Bounded log of recent diagnostic events plus per-category counts
pub struct DiagnosticsLog {
    inner: Mutex<Inner>,
    capacity: usize,
    total: AtomicU64,
}

impl DiagnosticsLog {
    /// Create a log retaining at most `capacity` recent entries
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                recent: VecDeque::with_capacity(capacity.min(1024)),
                by_category: HashMap::new(),
            }),
            capacity,
            total: AtomicU64::new(0),
        }
    }

    /// Record an event and emit it through `tracing`
    pub fn record(&self, level: DiagnosticLevel, category: &'static str, message: impl Into<String>) {
        let message = message.into();

        {
            let _guard = SuppressionGuard::enter();
            match level {
                DiagnosticLevel::Info => tracing::info!(category, "{}", message),
                DiagnosticLevel::Warn => tracing::warn!(category, "{}", message),
                DiagnosticLevel::Error => tracing::error!(category, "{}", message),
            }
        }

        self.total.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        *inner.by_category.entry(category).or_insert(0) += 1;
        if self.capacity == 0 {
            return;
        }
        if inner.recent.len() >= self.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(DiagnosticEntry {
            timestamp: Instant::now(),
            level,
            category,
            message,
        });
    }

    pub fn info(&self, category: &'static str, message: impl Into<String>) {
        self.record(DiagnosticLevel::Info, category, message);
    }

    pub fn warn(&self, category: &'static str, message: impl Into<String>) {
        self.record(DiagnosticLevel::Warn, category, message);
    }

    pub fn error(&self, category: &'static str, message: impl Into<String>) {
        self.record(DiagnosticLevel::Error, category, message);
    }

    /// Record a pipeline error under its own category
    pub fn record_error(&self, error: &PipelineError) {
        let level = if error.is_recoverable() {
            DiagnosticLevel::Warn
        } else {
            DiagnosticLevel::Error
        };
        self.record(level, error.category(), error.to_string());
    }

    /// Total events recorded since creation
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Number of events recorded for one category
    pub fn count(&self, category: &str) -> u64 {
        self.inner.lock().by_category.get(category).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let inner = self.inner.lock();
        DiagnosticsSnapshot {
            total: self.total(),
            by_category: inner.by_category.clone(),
            recent: inner.recent.iter().cloned().collect(),
        }
    }

    /// Human-readable summary of the most frequent categories and latest events
    pub fn summary(&self) -> String {
        let snapshot = self.snapshot();

        let mut summary = String::new();
        summary.push_str("Diagnostics:\n");
        summary.push_str(&format!("  Total events: {}\n", snapshot.total));

        if !snapshot.by_category.is_empty() {
            summary.push_str("\nEvents by category:\n");
            let mut categories: Vec<_> = snapshot.by_category.iter().collect();
            categories.sort_by_key(|(_, count)| std::cmp::Reverse(**count));
            for (category, count) in categories.iter().take(5) {
                summary.push_str(&format!("  {}: {}\n", category, count));
            }
        }

        if !snapshot.recent.is_empty() {
            summary.push_str("\nRecent events:\n");
            for entry in snapshot.recent.iter().rev().take(3) {
                let ago = round_millis(entry.timestamp.elapsed());
                summary.push_str(&format!(
                    "  [{:?} ago] {}: {}\n",
                    ago, entry.category, entry.message
                ));
            }
        }

        summary
    }
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

impl std::fmt::Debug for DiagnosticsLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsLog")
            .field("capacity", &self.capacity)
            .field("total", &self.total())
            .finish()
    }
}

/// Format an error for user display with helpful context
pub fn format_user_error(error: &PipelineError) -> String {
    let mut output = format!("Error: {}\n\n", error);

    match error.category() {
        "config" => {
            output.push_str("Configuration issue detected. Please check:\n");
            output.push_str("  • Your config file syntax (YAML format)\n");
            output.push_str("  • max_queue_size and max_export_batch_size are positive\n");
            output.push_str("  • max_export_batch_size does not exceed max_queue_size\n");
            output.push_str("  • OTEL_BSP_* environment variables hold integers\n");
            output.push_str("\nRun 'telepipe config --check' to validate your configuration.\n");
        },
        "lifecycle" => {
            output.push_str("The pipeline has already been shut down.\n");
        },
        "runtime" => {
            output.push_str("The pipeline must be started from within a tokio runtime.\n");
        },
        _ => {
            output.push_str("Run with RUST_LOG=debug for more detail.\n");
        },
    }

    if error.is_recoverable() {
        output.push_str("\nThis error may be temporary and will be retried.\n");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_category() {
        let log = DiagnosticsLog::new(10);
        log.warn("overflow", "ring buffer full");
        log.warn("overflow", "ring buffer full");
        log.record_error(&PipelineError::export("connection refused"));

        assert_eq!(log.total(), 3);
        assert_eq!(log.count("overflow"), 2);
        assert_eq!(log.count("export"), 1);
        assert_eq!(log.count("lifecycle"), 0);
    }

    #[test]
    fn test_recent_entries_are_bounded() {
        let log = DiagnosticsLog::new(2);
        log.info("lifecycle", "one");
        log.info("lifecycle", "two");
        log.info("lifecycle", "three");

        let snapshot = log.snapshot();
        assert_eq!(snapshot.total, 3);
        let messages: Vec<_> = snapshot.recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn test_summary_lists_categories() {
        let log = DiagnosticsLog::new(4);
        log.error("export", "batch dropped after 3 retries");
        let summary = log.summary();
        assert!(summary.contains("Total events: 1"));
        assert!(summary.contains("export: 1"));
    }

    #[test]
    fn test_format_user_error() {
        let formatted = format_user_error(&PipelineError::config("max_queue_size must be greater than 0"));
        assert!(formatted.contains("Configuration issue"));
        assert!(formatted.contains("config --check"));
    }
}
