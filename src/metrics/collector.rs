//! Periodic collection of the aggregation store into the export path.

use crate::core::time::now_nanos;
use crate::core::{PipelineError, Result, SuppressionGuard};
use crate::metrics::store::AggregationStore;
use crate::pipeline::Processor;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Collect every live series and submit the points to `sink`.
///
/// Returns how many points the sink accepted.
pub fn collect_and_submit(store: &AggregationStore, sink: &dyn Processor) -> usize {
    store
        .collect_points(now_nanos())
        .into_iter()
        .filter(|point| sink.on_end(point.clone().into()).is_accepted())
        .count()
}

/// Background task collecting a store on a fixed interval.
///
/// The first collection happens one full interval after spawning. The task
/// stops when the collector is stopped or dropped.
#[derive(Debug)]
pub struct MetricsCollector {
    handle: JoinHandle<()>,
    interval: Duration,
}

impl MetricsCollector {
    pub fn spawn(store: Arc<AggregationStore>, sink: Arc<dyn Processor>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(PipelineError::config("collection interval must be greater than 0"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::Runtime(e.to_string()))?;

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let accepted = collect_and_submit(&store, sink.as_ref());
                let _guard = SuppressionGuard::enter();
                tracing::trace!(points = accepted, "collected metrics");
            }
        });

        Ok(Self { handle, interval })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Attributes, TelemetryItem};
    use crate::metrics::{InstrumentDescriptor, InstrumentKind, Temporality};
    use crate::pipeline::SubmitStatus;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Sink {
        items: Mutex<Vec<TelemetryItem>>,
    }

    #[async_trait::async_trait]
    impl Processor for Sink {
        fn on_end(&self, item: TelemetryItem) -> SubmitStatus {
            self.items.lock().push(item);
            SubmitStatus::Accepted
        }

        async fn force_flush(&self, _timeout: Duration) -> bool {
            true
        }

        async fn shutdown(&self, _timeout: Duration) -> bool {
            true
        }

        fn name(&self) -> &str {
            "sink"
        }
    }

    fn store() -> Arc<AggregationStore> {
        let store = AggregationStore::new(Temporality::Cumulative, 100).unwrap();
        store
            .register(InstrumentDescriptor::new("requests", InstrumentKind::Counter))
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_collect_and_submit_counts_accepted_points() {
        let store = store();
        let sink = Sink::default();
        store.record("requests", 2.0, &Attributes::new().with("route", "/a"));
        store.record("requests", 3.0, &Attributes::new().with("route", "/b"));

        assert_eq!(collect_and_submit(&store, &sink), 2);
        assert_eq!(sink.items.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_on_interval() {
        let store = store();
        let sink = Arc::new(Sink::default());
        store.record("requests", 1.0, &Attributes::new());

        let collector =
            MetricsCollector::spawn(Arc::clone(&store), Arc::clone(&sink) as Arc<dyn Processor>, Duration::from_secs(10))
                .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(sink.items.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sink.items.lock().len(), 1);

        collector.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.items.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let result = MetricsCollector::spawn(store(), Arc::new(Sink::default()), Duration::ZERO);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
