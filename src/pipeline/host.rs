//! Host-facing pipeline: one batch processor, optional extra processors, a
//! metric store with its collector, and the lifecycle calls bootstrapping
//! code needs.

use crate::core::{Backoff, Config, DiagnosticsLog, Result, SuppressionGuard, TelemetryItem};
use crate::export::Exporter;
use crate::metrics::{collect_and_submit, AggregationStore, Meter, MetricsCollector};
use crate::pipeline::batch::BatchProcessor;
use crate::pipeline::processor::{Processor, ProcessorChain, SubmitStatus};
use crate::pipeline::state::SchedulerState;
use crate::pipeline::stats::PipelineStats;
use crate::core::time::{deadline_after, remaining};
use crate::core::Attributes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`Pipeline`]
pub struct PipelineBuilder<E> {
    exporter: E,
    config: Config,
    processors: Vec<Box<dyn Processor>>,
    backoff: Option<Box<dyn Backoff>>,
    collect_periodically: bool,
}

impl<E: Exporter> PipelineBuilder<E> {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Append a processor after the batch processor. It receives every item.
    pub fn processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Box::new(backoff));
        self
    }

    /// Collect metrics only on force flush and shutdown
    pub fn without_collector(mut self) -> Self {
        self.collect_periodically = false;
        self
    }

    /// Validate the configuration and start the pipeline on the current runtime.
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let diagnostics = Arc::new(DiagnosticsLog::new(self.config.logging.diagnostics_capacity));

        let mut batch = BatchProcessor::builder(self.exporter)
            .config(self.config.batch.clone())
            .retry(self.config.retry.clone())
            .diagnostics(Arc::clone(&diagnostics));
        if let Some(backoff) = self.backoff {
            batch = batch.boxed_backoff(backoff);
        }
        let batch = Arc::new(batch.build()?);

        let mut chain = ProcessorChain::new().with(Arc::clone(&batch));
        for processor in self.processors {
            chain.push(processor);
        }
        let chain = Arc::new(chain);

        let store = Arc::new(
            AggregationStore::new(
                self.config.metrics.temporality,
                self.config.metrics.max_series_per_instrument,
            )?
            .with_diagnostics(Arc::clone(&diagnostics)),
        );

        let collector = if self.collect_periodically {
            Some(MetricsCollector::spawn(
                Arc::clone(&store),
                Arc::clone(&chain) as Arc<dyn Processor>,
                self.config.metrics.collection_interval,
            )?)
        } else {
            None
        };

        {
            let _guard = SuppressionGuard::enter();
            tracing::debug!(processors = ?chain, "pipeline started");
        }

        Ok(Pipeline {
            meter: Meter::new(Arc::clone(&store)),
            config: self.config,
            batch,
            chain,
            store,
            diagnostics,
            collector: Mutex::new(collector),
            shutdown_started: AtomicBool::new(false),
        })
    }
}

/// A running telemetry pipeline.
///
/// `submit` and metric recording never block. `force_flush` and `shutdown`
/// take a timeout and report false when it elapses.
pub struct Pipeline {
    config: Config,
    batch: Arc<BatchProcessor>,
    chain: Arc<ProcessorChain>,
    store: Arc<AggregationStore>,
    meter: Meter,
    diagnostics: Arc<DiagnosticsLog>,
    collector: Mutex<Option<MetricsCollector>>,
    shutdown_started: AtomicBool,
}

impl Pipeline {
    pub fn builder<E: Exporter>(exporter: E) -> PipelineBuilder<E> {
        PipelineBuilder {
            exporter,
            config: Config::default(),
            processors: Vec::new(),
            backoff: None,
            collect_periodically: true,
        }
    }

    /// Start a pipeline from `config` with a single exporter
    pub fn new<E: Exporter>(exporter: E, config: Config) -> Result<Self> {
        Self::builder(exporter).config(config).build()
    }

    /// Hand a finished item to every processor. Never blocks.
    #[inline]
    pub fn submit(&self, item: impl Into<TelemetryItem>) -> SubmitStatus {
        self.chain.on_end(item.into())
    }

    /// Record a measurement on a registered instrument
    pub fn record(&self, instrument: &str, value: f64, attributes: &Attributes) -> bool {
        self.store.record(instrument, value, attributes)
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn store(&self) -> &Arc<AggregationStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsLog> {
        &self.diagnostics
    }

    pub fn batch_processor(&self) -> &BatchProcessor {
        &self.batch
    }

    /// The processor chain, for installing as a sink elsewhere (e.g. a tracing layer)
    pub fn processor(&self) -> Arc<dyn Processor> {
        Arc::clone(&self.chain) as Arc<dyn Processor>
    }

    pub fn state(&self) -> SchedulerState {
        self.batch.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.batch.stats()
    }

    /// Collect metrics now and submit the points. Returns the accepted count.
    pub fn collect_metrics(&self) -> usize {
        collect_and_submit(&self.store, self.chain.as_ref())
    }

    /// Collect metrics, then export everything submitted before the call.
    pub async fn force_flush(&self, timeout: Duration) -> bool {
        if !self.shutdown_started.load(Ordering::Acquire) {
            self.collect_metrics();
        }
        self.chain.force_flush(timeout).await
    }

    /// Stop the collector, submit a final collection, then drain and shut
    /// down every processor. A second call only reports the outcome.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);

        if !self.shutdown_started.swap(true, Ordering::AcqRel) {
            if let Some(collector) = self.collector.lock().take() {
                collector.stop();
            }
            let points = self.collect_metrics();
            let _guard = SuppressionGuard::enter();
            tracing::debug!(points, "final metric collection");
        }

        self.chain.shutdown(remaining(deadline)).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("chain", &self.chain)
            .field("state", &self.state())
            .field("store", &self.store)
            .finish()
    }
}
