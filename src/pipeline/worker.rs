//! Background export loop of a [`BatchProcessor`](super::BatchProcessor).
//!
//! The worker is the only consumer of the ring buffer and the only caller of
//! the exporter. It runs as one tokio task inside a suppression scope, so
//! nothing it or the exporter logs can flow back into the pipeline.

use crate::core::{Backoff, Batch};
use crate::export::{ExportFailure, ExportResult, Exporter, FailureKind};
use crate::pipeline::accumulator::BatchAccumulator;
use crate::pipeline::batch::Shared;
use crate::pipeline::state::SchedulerState;
use crate::pipeline::stats::{add, bump};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) struct BatchWorker<E: Exporter> {
    pub(crate) shared: Arc<Shared>,
    pub(crate) exporter: E,
    pub(crate) accumulator: BatchAccumulator,
    pub(crate) backoff: Box<dyn Backoff>,
    pub(crate) max_retries: u32,
    pub(crate) scheduled_delay: Duration,
    pub(crate) export_timeout: Duration,
    pub(crate) max_export_batch_size: usize,
    pub(crate) reported_drops: u64,
}

impl<E: Exporter> BatchWorker<E> {
    pub(crate) async fn run(mut self) {
        tracing::debug!(exporter = self.exporter.name(), "batch worker started");
        let mut next_tick = Instant::now() + self.scheduled_delay;

        while !self.shared.state.get().is_closing() {
            self.report_drops();

            if self.shared.flush_pending() {
                self.flush().await;
                continue;
            }

            if self.shared.buffer.is_empty() {
                self.shared.state.transition(SchedulerState::Idle);

                let notified = self.shared.arrival.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.shared.buffer.is_empty() && !self.shared.control_pending() {
                    let ticked = tokio::time::timeout_at(next_tick, notified).await.is_err();
                    if ticked {
                        next_tick = Instant::now() + self.scheduled_delay;
                    }
                }
                continue;
            }

            self.shared.state.transition(SchedulerState::Accumulating);
            let shared = Arc::clone(&self.shared);
            let batch = self
                .accumulator
                .poll_until(
                    self.max_export_batch_size,
                    next_tick.saturating_duration_since(Instant::now()),
                    || shared.control_pending(),
                )
                .await;

            if Instant::now() >= next_tick {
                next_tick = Instant::now() + self.scheduled_delay;
            }

            if !batch.is_empty() {
                self.export(batch).await;
            }
        }

        self.drain().await;
    }

    /// Export everything up to the highest requested flush target, then
    /// flush the exporter and publish the ticket served.
    async fn flush(&mut self) {
        let ticket = self.shared.flush_tickets.load(Ordering::Acquire);
        let target = self.shared.flush_target.load(Ordering::Acquire);
        self.shared.state.transition(SchedulerState::Accumulating);

        while self.shared.buffer.removed_count() < target {
            if self.shared.state.get().is_closing() {
                // The shutdown drain covers this target
                return;
            }

            let batch = self.accumulator.take(self.max_export_batch_size);
            if batch.is_empty() {
                // A producer claimed a slot and is still writing it
                tokio::task::yield_now().await;
                continue;
            }
            self.export(batch).await;
        }

        let timeout = self.export_timeout;
        let flushed = tokio::time::timeout(timeout, self.exporter.force_flush(timeout))
            .await
            .unwrap_or(false);
        if !flushed {
            self.shared
                .diagnostics
                .warn("export", format!("exporter '{}' failed to flush", self.exporter.name()));
        }

        self.shared.publish_flushed(ticket);
    }

    /// Final drain after shutdown was requested
    async fn drain(mut self) {
        let target = self.shared.drain_target.load(Ordering::Acquire);
        tracing::debug!(target, "draining batch worker");

        loop {
            let batch = self.accumulator.take(self.max_export_batch_size);
            if batch.is_empty() {
                if self.shared.buffer.removed_count() >= target {
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            }
            self.export(batch).await;
        }
        self.report_drops();

        let budget = self.shared.remaining_shutdown_budget();
        let exporter_ok = tokio::time::timeout(budget, self.exporter.shutdown(budget))
            .await
            .unwrap_or(false);
        self.shared
            .exporter_shutdown_ok
            .store(exporter_ok, Ordering::Release);

        self.shared.publish_flushed(u64::MAX);
        self.shared.state.transition(SchedulerState::Terminated);
        self.shared.diagnostics.info(
            "lifecycle",
            format!(
                "batch processor terminated ({} items exported, {} batches dropped)",
                self.shared.counters.exported_items(),
                self.shared.counters.dropped_batches()
            ),
        );
    }

    /// Export one batch, retrying transient failures within the budget.
    async fn export(&mut self, batch: Batch) {
        let len = batch.len();
        self.shared.state.transition(SchedulerState::Exporting);

        match self.export_with_retry(&batch).await {
            Ok(()) => {
                bump(&self.shared.counters.exported_batches);
                add(&self.shared.counters.exported_items, len);
            },
            Err(failure) => {
                bump(&self.shared.counters.dropped_batches);
                add(&self.shared.counters.dropped_batch_items, len);
                self.shared.diagnostics.warn(
                    "export",
                    format!(
                        "dropped batch of {} items from exporter '{}': {}",
                        len,
                        self.exporter.name(),
                        failure
                    ),
                );
            },
        }

        self.shared.state.transition(SchedulerState::Idle);
    }

    async fn export_with_retry(&mut self, batch: &Batch) -> Result<(), ExportFailure> {
        let mut retries = 0u32;

        loop {
            bump(&self.shared.counters.export_attempts);
            let timeout = self.attempt_timeout();

            let result = match tokio::time::timeout(timeout, self.exporter.export(batch)).await {
                Ok(result) => result,
                Err(_) => {
                    bump(&self.shared.counters.export_timeouts);
                    ExportResult::transient(format!("export timed out after {:?}", timeout))
                },
            };

            let failure = match result {
                ExportResult::Success => return Ok(()),
                ExportResult::Failure(failure) => failure,
            };

            if !failure.kind.is_retryable() {
                return Err(failure);
            }

            if retries >= self.max_retries {
                return Err(ExportFailure {
                    kind: FailureKind::Permanent,
                    reason: format!("retry budget of {} exhausted: {}", self.max_retries, failure),
                });
            }

            retries += 1;
            bump(&self.shared.counters.retries);

            let delay = match failure.kind {
                FailureKind::Throttled { retry_after } => retry_after,
                _ => self.backoff.delay(retries),
            };
            tracing::debug!(retry = retries, ?delay, "retrying export: {}", failure);

            if !wait_before_retry(&self.shared, delay).await {
                return Err(ExportFailure {
                    kind: FailureKind::Permanent,
                    reason: format!("retry abandoned at shutdown deadline: {}", failure),
                });
            }
        }
    }

    /// Export timeout, shortened to the shutdown deadline once one is set
    fn attempt_timeout(&self) -> Duration {
        match self.shared.shutdown_deadline() {
            Some(deadline) => self
                .export_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.export_timeout,
        }
    }

    fn report_drops(&mut self) {
        let dropped = self.shared.counters.dropped();
        if dropped > self.reported_drops {
            self.shared.diagnostics.warn(
                "overflow",
                format!(
                    "ring buffer full: {} items dropped ({} total)",
                    dropped - self.reported_drops,
                    dropped
                ),
            );
            self.reported_drops = dropped;
        }
    }
}

/// Sleep `delay` unless that would overrun the shutdown deadline.
/// Returns false when the retry should be abandoned.
async fn wait_before_retry(shared: &Shared, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        let signal = shared.shutdown_signal.notified();
        tokio::pin!(signal);
        signal.as_mut().enable();

        if let Some(deadline) = shared.shutdown_deadline() {
            if sleep.deadline() > deadline {
                return false;
            }
        }

        tokio::select! {
            _ = &mut sleep => return true,
            _ = &mut signal => continue,
        }
    }
}
