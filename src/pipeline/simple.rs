//! Unbatched processor: every item is exported on its own as soon as the
//! export task gets to it. Meant for tests and debugging, not production load.

use crate::core::{is_suppressed, suppressed, Batch, BatchConfig, PipelineError, Result, TelemetryItem};
use crate::export::{ExportResult, Exporter};
use crate::pipeline::processor::{Processor, SubmitStatus};
use crate::pipeline::state::SchedulerState;
use crate::pipeline::stats::{bump, PipelineCounters, PipelineStats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Export(TelemetryItem),
    Flush(oneshot::Sender<bool>),
    Shutdown(Duration, oneshot::Sender<bool>),
}

/// Processor exporting each item as a one-item batch, in submission order.
pub struct SimpleProcessor {
    tx: mpsc::Sender<Command>,
    counters: Arc<PipelineCounters>,
    closed: AtomicBool,
    terminated: Arc<AtomicBool>,
    exporter_name: String,
}

impl SimpleProcessor {
    /// Spawn the export task on the current runtime. `max_queue_size` bounds
    /// the number of items waiting for the exporter; `export_timeout` bounds
    /// every exporter call.
    pub fn new<E: Exporter>(exporter: E, config: &BatchConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::Runtime(e.to_string()))?;

        let (tx, rx) = mpsc::channel(config.max_queue_size);
        let counters = Arc::new(PipelineCounters::default());
        let terminated = Arc::new(AtomicBool::new(false));
        let exporter_name = exporter.name().to_string();

        runtime.spawn(suppressed(run(
            exporter,
            rx,
            Arc::clone(&counters),
            Arc::clone(&terminated),
            config.export_timeout,
        )));

        Ok(Self {
            tx,
            counters,
            closed: AtomicBool::new(false),
            terminated,
            exporter_name,
        })
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    pub fn exporter_name(&self) -> &str {
        &self.exporter_name
    }

    pub fn stats(&self) -> PipelineStats {
        let state = if self.terminated.load(Ordering::Acquire) {
            SchedulerState::Terminated
        } else if self.closed.load(Ordering::Acquire) {
            SchedulerState::ShuttingDown
        } else {
            SchedulerState::Idle
        };
        let capacity = self.tx.max_capacity();
        self.counters
            .snapshot(state, capacity - self.tx.capacity(), capacity)
    }

    /// Send a control command and wait for its reply within `timeout`
    async fn request(&self, timeout: Duration, command: impl FnOnce(oneshot::Sender<bool>) -> Command) -> bool {
        let (reply, done) = oneshot::channel();
        let exchange = async {
            self.tx.send(command(reply)).await.ok()?;
            done.await.ok()
        };
        matches!(tokio::time::timeout(timeout, exchange).await, Ok(Some(true)))
    }
}

async fn run<E: Exporter>(
    mut exporter: E,
    mut rx: mpsc::Receiver<Command>,
    counters: Arc<PipelineCounters>,
    terminated: Arc<AtomicBool>,
    export_timeout: Duration,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Export(item) => {
                let batch = Batch::new(vec![item]);
                bump(&counters.export_attempts);
                let result = tokio::time::timeout(export_timeout, exporter.export(&batch))
                    .await
                    .unwrap_or_else(|_| {
                        bump(&counters.export_timeouts);
                        ExportResult::transient(format!("export timed out after {:?}", export_timeout))
                    });

                match result {
                    ExportResult::Success => {
                        bump(&counters.exported_batches);
                        bump(&counters.exported_items);
                    },
                    ExportResult::Failure(failure) => {
                        bump(&counters.dropped_batches);
                        bump(&counters.dropped_batch_items);
                        tracing::warn!(exporter = exporter.name(), "dropped item: {}", failure);
                    },
                }
            },
            Command::Flush(reply) => {
                let ok = tokio::time::timeout(export_timeout, exporter.force_flush(export_timeout))
                    .await
                    .unwrap_or(false);
                let _ = reply.send(ok);
            },
            Command::Shutdown(budget, reply) => {
                let ok = tokio::time::timeout(budget, exporter.shutdown(budget))
                    .await
                    .unwrap_or(false);
                terminated.store(true, Ordering::Release);
                let _ = reply.send(ok);
                break;
            },
        }
    }
}

#[async_trait::async_trait]
impl Processor for SimpleProcessor {
    fn on_end(&self, item: TelemetryItem) -> SubmitStatus {
        bump(&self.counters.received);

        if self.closed.load(Ordering::Acquire) {
            bump(&self.counters.rejected);
            return SubmitStatus::Closed;
        }
        if is_suppressed() {
            bump(&self.counters.suppressed);
            return SubmitStatus::Suppressed;
        }

        match self.tx.try_send(Command::Export(item)) {
            Ok(()) => {
                bump(&self.counters.accepted);
                SubmitStatus::Accepted
            },
            Err(mpsc::error::TrySendError::Full(_)) => {
                bump(&self.counters.dropped);
                SubmitStatus::Dropped
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                bump(&self.counters.rejected);
                SubmitStatus::Closed
            },
        }
    }

    async fn force_flush(&self, timeout: Duration) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return self.terminated.load(Ordering::Acquire);
        }
        self.request(timeout, Command::Flush).await
    }

    async fn shutdown(&self, timeout: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return self.terminated.load(Ordering::Acquire);
        }
        self.request(timeout, |reply| Command::Shutdown(timeout, reply))
            .await
    }

    fn name(&self) -> &str {
        "simple"
    }
}

impl std::fmt::Debug for SimpleProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleProcessor")
            .field("exporter", &self.exporter_name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
