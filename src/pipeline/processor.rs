//! Processor abstraction and ordered composition.

use crate::core::time::{deadline_after, remaining};
use crate::core::TelemetryItem;
use std::sync::Arc;
use std::time::Duration;

/// What happened to a submitted item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitStatus {
    /// Queued for export
    Accepted,
    /// Ring buffer full; counted as dropped
    Dropped,
    /// Pipeline shut down; counted as rejected
    Closed,
    /// Submitted from a suppression scope; counted and ignored
    Suppressed,
}

impl SubmitStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitStatus::Accepted)
    }
}

/// Receives finished telemetry and owns the path to an exporter.
///
/// `on_end` is called from arbitrary application threads and must never block.
#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    fn on_end(&self, item: TelemetryItem) -> SubmitStatus;

    /// Export everything submitted so far. False on timeout.
    async fn force_flush(&self, timeout: Duration) -> bool;

    /// Drain and stop. False on timeout.
    async fn shutdown(&self, timeout: Duration) -> bool;

    fn name(&self) -> &str;
}

#[async_trait::async_trait]
impl<P: Processor + ?Sized> Processor for Arc<P> {
    fn on_end(&self, item: TelemetryItem) -> SubmitStatus {
        (**self).on_end(item)
    }

    async fn force_flush(&self, timeout: Duration) -> bool {
        (**self).force_flush(timeout).await
    }

    async fn shutdown(&self, timeout: Duration) -> bool {
        (**self).shutdown(timeout).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Ordered list of processors receiving every item.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.push(Box::new(processor));
        self
    }

    pub fn push(&mut self, processor: Box<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[async_trait::async_trait]
impl Processor for ProcessorChain {
    /// Fans the item out in order. Accepted if any member accepted it.
    fn on_end(&self, item: TelemetryItem) -> SubmitStatus {
        let Some((last, rest)) = self.processors.split_last() else {
            return SubmitStatus::Dropped;
        };

        let mut first: Option<SubmitStatus> = None;
        let mut accepted = false;
        let mut note = |status: SubmitStatus| {
            accepted |= status.is_accepted();
            if first.is_none() {
                first = Some(status);
            }
        };
        for processor in rest {
            note(processor.on_end(item.clone()));
        }
        note(last.on_end(item));

        if accepted {
            SubmitStatus::Accepted
        } else {
            first.unwrap_or(SubmitStatus::Dropped)
        }
    }

    async fn force_flush(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut ok = true;
        for processor in &self.processors {
            ok &= processor.force_flush(remaining(deadline)).await;
        }
        ok
    }

    async fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut ok = true;
        for processor in &self.processors {
            ok &= processor.shutdown(remaining(deadline)).await;
        }
        ok
    }

    fn name(&self) -> &str {
        "chain"
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.processors.iter().map(|p| p.name()))
            .finish()
    }
}
