//! Common test utilities and fixtures.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telepipe_lib::core::{Batch, BatchConfig, TelemetryItem};
use telepipe_lib::export::{ExportResult, Exporter};
use telepipe_lib::logs::{LogRecord, LogSeverity};

/// What the scripted exporter does on one call
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Succeed,
    Transient,
    Permanent,
    /// Sleep before succeeding, to trip the export timeout
    Hang(Duration),
}

/// Exporter that follows a script of results, then succeeds forever.
#[derive(Clone, Default)]
pub struct ScriptedExporter {
    script: Arc<Mutex<VecDeque<Step>>>,
    delivered: Arc<Mutex<Vec<TelemetryItem>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedExporter {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<TelemetryItem> {
        self.delivered.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Exporter for ScriptedExporter {
    async fn export(&mut self, batch: &Batch) -> ExportResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(Step::Succeed);

        match step {
            Step::Succeed => {},
            Step::Transient => return ExportResult::transient("connection reset"),
            Step::Permanent => return ExportResult::permanent("unauthorized"),
            Step::Hang(delay) => tokio::time::sleep(delay).await,
        }

        self.delivered.lock().extend(batch.iter().cloned());
        ExportResult::Success
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Log record whose timestamp doubles as a sequence number
pub fn log(n: u64) -> TelemetryItem {
    LogRecord::new(n, LogSeverity::Info, format!("item {}", n)).into()
}

/// Batch config that never fires the timer on its own
pub fn batch_config(queue: usize, batch: usize) -> BatchConfig {
    BatchConfig {
        max_queue_size: queue,
        max_export_batch_size: batch,
        scheduled_delay: Duration::from_secs(3600),
        export_timeout: Duration::from_secs(5),
    }
}
