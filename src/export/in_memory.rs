//! Exporter that keeps every exported batch in memory.
//!
//! Clones share the same storage, so a test can hand one clone to the
//! pipeline and inspect what arrived through another.

use crate::core::{Batch, TelemetryItem};
use crate::export::{ExportResult, Exporter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Shared {
    batches: Mutex<Vec<Vec<TelemetryItem>>>,
    flushes: AtomicUsize,
    shut_down: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    shared: Arc<Shared>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every exported batch, in export order
    pub fn batches(&self) -> Vec<Vec<TelemetryItem>> {
        self.shared.batches.lock().clone()
    }

    /// Every exported item, flattened in export order
    pub fn items(&self) -> Vec<TelemetryItem> {
        self.shared.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn item_count(&self) -> usize {
        self.shared.batches.lock().iter().map(Vec::len).sum()
    }

    pub fn batch_count(&self) -> usize {
        self.shared.batches.lock().len()
    }

    pub fn flush_count(&self) -> usize {
        self.shared.flushes.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Forget everything exported so far
    pub fn reset(&self) {
        self.shared.batches.lock().clear();
    }
}

#[async_trait::async_trait]
impl Exporter for InMemoryExporter {
    async fn export(&mut self, batch: &Batch) -> ExportResult {
        if self.is_shut_down() {
            return ExportResult::permanent("exporter is shut down");
        }
        self.shared.batches.lock().push(batch.items().to_vec());
        ExportResult::Success
    }

    async fn force_flush(&mut self, _timeout: Duration) -> bool {
        self.shared.flushes.fetch_add(1, Ordering::AcqRel);
        true
    }

    async fn shutdown(&mut self, _timeout: Duration) -> bool {
        self.shared.shut_down.store(true, Ordering::Release);
        true
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{LogRecord, LogSeverity};

    #[tokio::test]
    async fn test_clones_share_storage() {
        let observer = InMemoryExporter::new();
        let mut exporter = observer.clone();

        let batch = Batch::new(vec![LogRecord::new(1, LogSeverity::Info, "hello").into()]);
        assert!(exporter.export(&batch).await.is_success());
        assert_eq!(observer.item_count(), 1);
        assert_eq!(observer.batch_count(), 1);

        exporter.shutdown(Duration::from_secs(1)).await;
        assert!(observer.is_shut_down());
        assert!(!exporter.export(&batch).await.is_success());
    }
}
