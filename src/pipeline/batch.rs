//! Batching processor: producers enqueue into a bounded ring buffer and a
//! background worker exports batches on size, timer, flush or shutdown.

use crate::buffer::RingBuffer;
use crate::core::{
    is_suppressed, suppressed, Backoff, BatchConfig, DiagnosticsLog, ExponentialBackoff,
    PipelineError, Result, RetryConfig, SuppressionGuard, TelemetryItem,
};
use crate::export::Exporter;
use crate::pipeline::accumulator::BatchAccumulator;
use crate::pipeline::processor::{Processor, SubmitStatus};
use crate::pipeline::state::{AtomicState, SchedulerState};
use crate::pipeline::stats::{bump, PipelineCounters, PipelineStats};
use crate::pipeline::worker::BatchWorker;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// State shared between producers, the host and the worker
pub(crate) struct Shared {
    pub(crate) buffer: Arc<RingBuffer<TelemetryItem>>,
    /// Raised by producers (first item while idle, full batch ready) and by
    /// flush/shutdown requests
    pub(crate) arrival: Arc<Notify>,
    /// Wakes a worker sleeping between retries when shutdown begins
    pub(crate) shutdown_signal: Notify,
    pub(crate) state: AtomicState,
    pub(crate) counters: PipelineCounters,
    pub(crate) diagnostics: Arc<DiagnosticsLog>,
    pub(crate) max_export_batch_size: usize,
    closed: AtomicBool,
    /// Producers between their `closed` check and the end of their enqueue
    in_flight: AtomicUsize,
    shutdown_started: AtomicBool,
    shutdown_deadline: Mutex<Option<Instant>>,
    pub(crate) drain_target: AtomicU64,
    pub(crate) exporter_shutdown_ok: AtomicBool,
    /// Highest buffer position any caller asked to flush through
    pub(crate) flush_target: AtomicU64,
    /// Number of flush requests issued so far
    pub(crate) flush_tickets: AtomicU64,
    /// Highest ticket the worker has served; `u64::MAX` once terminated
    flushed: watch::Sender<u64>,
}

impl Shared {
    pub(crate) fn flush_pending(&self) -> bool {
        self.flush_tickets.load(Ordering::Acquire) > *self.flushed.borrow()
    }

    /// A flush or shutdown is waiting for the worker
    pub(crate) fn control_pending(&self) -> bool {
        self.flush_pending() || self.state.get().is_closing()
    }

    pub(crate) fn publish_flushed(&self, ticket: u64) {
        self.flushed.send_if_modified(|current| {
            if ticket > *current {
                *current = ticket;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn shutdown_deadline(&self) -> Option<Instant> {
        *self.shutdown_deadline.lock()
    }

    pub(crate) fn remaining_shutdown_budget(&self) -> Duration {
        self.shutdown_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Admit one item unless intake is closed.
    ///
    /// The `in_flight` count brackets the `closed` check and the enqueue, so
    /// `begin_shutdown` either sees the producer or the producer sees `closed`.
    fn admit(&self, item: TelemetryItem) -> SubmitStatus {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let status = self.try_admit(item);
        self.in_flight.fetch_sub(1, Ordering::Release);
        status
    }

    #[inline]
    fn try_admit(&self, item: TelemetryItem) -> SubmitStatus {
        if self.closed.load(Ordering::SeqCst) {
            bump(&self.counters.rejected);
            return SubmitStatus::Closed;
        }

        if is_suppressed() {
            bump(&self.counters.suppressed);
            return SubmitStatus::Suppressed;
        }

        if !self.buffer.try_enqueue(item) {
            bump(&self.counters.dropped);
            return SubmitStatus::Dropped;
        }
        bump(&self.counters.accepted);
        SubmitStatus::Accepted
    }

    /// Close intake and hand the worker its drain target and deadline
    fn begin_shutdown(&self, timeout: Duration) {
        self.closed.store(true, Ordering::SeqCst);
        // Producers past the closed check finish a non-blocking enqueue
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }

        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365));
        *self.shutdown_deadline.lock() = Some(deadline);
        self.drain_target
            .store(self.buffer.claimed_count(), Ordering::Release);

        self.state.transition(SchedulerState::ShuttingDown);
        self.arrival.notify_one();
        self.shutdown_signal.notify_waiters();
    }
}

/// Builder for [`BatchProcessor`]
pub struct BatchProcessorBuilder<E> {
    exporter: E,
    config: BatchConfig,
    retry: RetryConfig,
    backoff: Option<Box<dyn Backoff>>,
    diagnostics: Option<Arc<DiagnosticsLog>>,
}

impl<E: Exporter> BatchProcessorBuilder<E> {
    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the exponential backoff derived from the retry config
    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Box::new(backoff));
        self
    }

    pub fn boxed_backoff(mut self, backoff: Box<dyn Backoff>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<DiagnosticsLog>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Validate the configuration and spawn the worker on the current tokio runtime.
    pub fn build(self) -> Result<BatchProcessor> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::Runtime(e.to_string()))?;

        let buffer = Arc::new(RingBuffer::new(self.config.max_queue_size)?);
        let arrival = Arc::new(Notify::new());
        let (flushed, _) = watch::channel(0u64);
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(DiagnosticsLog::new(256)));

        let shared = Arc::new(Shared {
            buffer: Arc::clone(&buffer),
            arrival: Arc::clone(&arrival),
            shutdown_signal: Notify::new(),
            state: AtomicState::new(SchedulerState::Idle),
            counters: PipelineCounters::default(),
            diagnostics,
            max_export_batch_size: self.config.max_export_batch_size,
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            shutdown_started: AtomicBool::new(false),
            shutdown_deadline: Mutex::new(None),
            drain_target: AtomicU64::new(0),
            exporter_shutdown_ok: AtomicBool::new(false),
            flush_target: AtomicU64::new(0),
            flush_tickets: AtomicU64::new(0),
            flushed,
        });

        let backoff = self
            .backoff
            .unwrap_or_else(|| Box::new(ExponentialBackoff::from(&self.retry)));
        let exporter_name = self.exporter.name().to_string();

        let worker = BatchWorker {
            shared: Arc::clone(&shared),
            exporter: self.exporter,
            accumulator: BatchAccumulator::new(buffer, arrival),
            backoff,
            max_retries: self.retry.max_retries,
            scheduled_delay: self.config.scheduled_delay,
            export_timeout: self.config.export_timeout,
            max_export_batch_size: self.config.max_export_batch_size,
            reported_drops: 0,
        };
        let handle = runtime.spawn(suppressed(worker.run()));

        {
            let _guard = SuppressionGuard::enter();
            tracing::info!(
                exporter = %exporter_name,
                max_queue_size = self.config.max_queue_size,
                max_export_batch_size = self.config.max_export_batch_size,
                scheduled_delay = ?self.config.scheduled_delay,
                "batch processor started"
            );
        }

        Ok(BatchProcessor {
            shared,
            worker: Mutex::new(Some(handle)),
            export_timeout: self.config.export_timeout,
            exporter_name,
        })
    }
}

/// Processor exporting items in batches from a background worker.
pub struct BatchProcessor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    export_timeout: Duration,
    exporter_name: String,
}

impl BatchProcessor {
    pub fn builder<E: Exporter>(exporter: E) -> BatchProcessorBuilder<E> {
        BatchProcessorBuilder {
            exporter,
            config: BatchConfig::default(),
            retry: RetryConfig::default(),
            backoff: None,
            diagnostics: None,
        }
    }

    /// Start a processor with the given batch config and default retry policy
    pub fn new<E: Exporter>(exporter: E, config: BatchConfig) -> Result<Self> {
        Self::builder(exporter).config(config).build()
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state.get()
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.shared.counters
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot(
            self.state(),
            self.shared.buffer.len(),
            self.shared.buffer.capacity(),
        )
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsLog> {
        &self.shared.diagnostics
    }

    pub fn exporter_name(&self) -> &str {
        &self.exporter_name
    }

    /// Enqueue one item without blocking
    #[inline]
    pub fn submit(&self, item: TelemetryItem) -> SubmitStatus {
        let shared = &self.shared;
        bump(&shared.counters.received);

        let status = shared.admit(item);
        if status == SubmitStatus::Accepted
            && (shared.state.get() == SchedulerState::Idle
                || shared.buffer.len() >= shared.max_export_batch_size)
        {
            shared.arrival.notify_one();
        }
        status
    }

    /// Export everything enqueued before this call, then flush the exporter.
    ///
    /// The exporter is flushed even when nothing is queued. Returns false if
    /// the timeout elapses first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        if self.shared.shutdown_started.load(Ordering::Acquire) {
            return self.wait_terminated(timeout).await;
        }

        // Target before ticket: a worker serving this ticket sees the target
        self.shared
            .flush_target
            .fetch_max(self.shared.buffer.claimed_count(), Ordering::AcqRel);
        let ticket = self.shared.flush_tickets.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.arrival.notify_one();

        let mut flushed = self.shared.flushed.subscribe();
        let done = tokio::time::timeout(timeout, flushed.wait_for(|served| *served >= ticket))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);

        if !done {
            let _guard = SuppressionGuard::enter();
            tracing::debug!(?timeout, ticket, "force flush timed out");
        }
        done
    }

    async fn wait_terminated(&self, timeout: Duration) -> bool {
        let mut flushed = self.shared.flushed.subscribe();
        tokio::time::timeout(timeout, flushed.wait_for(|position| *position == u64::MAX))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Stop intake, drain everything enqueued before the call, shut the
    /// exporter down and terminate.
    ///
    /// A second call returns immediately: true once terminated.
    pub async fn close(&self, timeout: Duration) -> bool {
        if self.shared.shutdown_started.swap(true, Ordering::AcqRel) {
            return self.state() == SchedulerState::Terminated;
        }

        self.shared.begin_shutdown(timeout);
        {
            let _guard = SuppressionGuard::enter();
            tracing::debug!(?timeout, "batch processor shutting down");
        }

        let Some(handle) = self.worker.lock().take() else {
            return self.state() == SchedulerState::Terminated;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                self.state() == SchedulerState::Terminated
                    && self.shared.exporter_shutdown_ok.load(Ordering::Acquire)
            },
            Ok(Err(e)) => {
                self.shared
                    .diagnostics
                    .error("lifecycle", format!("batch worker failed: {}", e));
                false
            },
            Err(_) => {
                self.shared.diagnostics.warn(
                    "lifecycle",
                    format!("shutdown did not complete within {:?}", timeout),
                );
                false
            },
        }
    }
}

#[async_trait::async_trait]
impl Processor for BatchProcessor {
    fn on_end(&self, item: TelemetryItem) -> SubmitStatus {
        self.submit(item)
    }

    async fn force_flush(&self, timeout: Duration) -> bool {
        self.flush(timeout).await
    }

    async fn shutdown(&self, timeout: Duration) -> bool {
        self.close(timeout).await
    }

    fn name(&self) -> &str {
        "batch"
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        // Best effort: let the worker drain in the background
        if !self.shared.shutdown_started.swap(true, Ordering::AcqRel) {
            self.shared.begin_shutdown(self.export_timeout);
        }
    }
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("exporter", &self.exporter_name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConstantBackoff;
    use crate::export::{ExportResult, InMemoryExporter};
    use crate::logs::{LogRecord, LogSeverity};
    use crate::core::Batch;

    fn log(n: u64) -> TelemetryItem {
        LogRecord::new(n, LogSeverity::Info, "test").into()
    }

    fn config(queue: usize, batch: usize) -> BatchConfig {
        BatchConfig {
            max_queue_size: queue,
            max_export_batch_size: batch,
            scheduled_delay: Duration::from_secs(3600),
            export_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_requires_runtime() {
        let result = BatchProcessor::new(InMemoryExporter::new(), BatchConfig::default());
        assert!(matches!(result, Err(PipelineError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let result = BatchProcessor::new(InMemoryExporter::new(), config(10, 20));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_full_batch_exports_without_timer() {
        let exporter = InMemoryExporter::new();
        let processor = BatchProcessor::new(exporter.clone(), config(100, 5)).unwrap();

        for n in 0..5 {
            assert_eq!(processor.submit(log(n)), SubmitStatus::Accepted);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while exporter.item_count() < 5 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(exporter.item_count(), 5);
        assert!(processor.close(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_timer_exports_partial_batch() {
        let exporter = InMemoryExporter::new();
        let mut cfg = config(100, 50);
        cfg.scheduled_delay = Duration::from_millis(50);
        let processor = BatchProcessor::new(exporter.clone(), cfg).unwrap();

        processor.submit(log(1));
        processor.submit(log(2));

        let deadline = Instant::now() + Duration::from_secs(5);
        while exporter.item_count() < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(exporter.batches(), vec![vec![log(1), log(2)]]);
    }

    #[tokio::test]
    async fn test_force_flush_exports_and_flushes_exporter() {
        let exporter = InMemoryExporter::new();
        let processor = BatchProcessor::new(exporter.clone(), config(100, 50)).unwrap();

        for n in 0..7 {
            processor.submit(log(n));
        }
        assert!(processor.flush(Duration::from_secs(5)).await);
        assert_eq!(exporter.item_count(), 7);
        assert_eq!(exporter.flush_count(), 1);

        let stats = processor.stats();
        assert_eq!(stats.exported_items, 7);
        assert_eq!(stats.queue_len, 0);
    }

    #[tokio::test]
    async fn test_overflow_is_counted() {
        let exporter = InMemoryExporter::new();
        let processor = BatchProcessor::new(exporter.clone(), config(4, 4)).unwrap();

        let statuses: Vec<_> = (0..10).map(|n| processor.submit(log(n))).collect();
        let dropped = statuses
            .iter()
            .filter(|s| **s == SubmitStatus::Dropped)
            .count() as u64;

        assert_eq!(processor.counters().dropped(), dropped);
        assert!(processor.close(Duration::from_secs(5)).await);
        assert_eq!(exporter.item_count() as u64, 10 - dropped);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let processor = BatchProcessor::new(InMemoryExporter::new(), config(10, 5)).unwrap();
        assert!(processor.close(Duration::from_secs(5)).await);

        assert_eq!(processor.submit(log(1)), SubmitStatus::Closed);
        assert_eq!(processor.counters().rejected(), 1);
        assert_eq!(processor.state(), SchedulerState::Terminated);
    }

    #[tokio::test]
    async fn test_suppressed_submission_is_ignored() {
        let exporter = InMemoryExporter::new();
        let processor = BatchProcessor::new(exporter.clone(), config(10, 5)).unwrap();

        {
            let _guard = SuppressionGuard::enter();
            assert_eq!(processor.submit(log(1)), SubmitStatus::Suppressed);
        }
        assert!(processor.close(Duration::from_secs(5)).await);
        assert_eq!(exporter.item_count(), 0);
        assert_eq!(processor.stats().suppressed, 1);
    }

    struct Throttling {
        throttles_left: u32,
        delivered: Arc<AtomicU64>,
    }

    #[async_trait::async_trait]
    impl Exporter for Throttling {
        async fn export(&mut self, batch: &Batch) -> ExportResult {
            if self.throttles_left > 0 {
                self.throttles_left -= 1;
                return ExportResult::throttled(Duration::from_millis(5), "slow down");
            }
            self.delivered.fetch_add(batch.len() as u64, Ordering::SeqCst);
            ExportResult::Success
        }

        fn name(&self) -> &str {
            "throttling"
        }
    }

    #[tokio::test]
    async fn test_throttled_export_is_retried() {
        let delivered = Arc::new(AtomicU64::new(0));
        let processor = BatchProcessor::builder(Throttling {
            throttles_left: 2,
            delivered: Arc::clone(&delivered),
        })
        .config(config(10, 5))
        .retry(RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        })
        .backoff(ConstantBackoff(Duration::from_secs(3600)))
        .build()
        .unwrap();

        processor.submit(log(1));
        assert!(processor.flush(Duration::from_secs(5)).await);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        let stats = processor.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.dropped_batches, 0);
    }
}
