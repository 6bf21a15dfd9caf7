//! Lock-free pipeline counters and their serializable snapshot.

use crate::pipeline::state::SchedulerState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters owned by one batch processor. Readable from any thread
/// without touching the scheduler.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) received: AtomicU64,
    pub(crate) accepted: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) suppressed: AtomicU64,
    pub(crate) exported_items: AtomicU64,
    pub(crate) exported_batches: AtomicU64,
    pub(crate) dropped_batches: AtomicU64,
    pub(crate) dropped_batch_items: AtomicU64,
    pub(crate) export_attempts: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) export_timeouts: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

#[inline]
fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl PipelineCounters {
    /// Items rejected because the ring buffer was full
    pub fn dropped(&self) -> u64 {
        read(&self.dropped)
    }

    /// Batches discarded after a permanent failure or an exhausted retry budget
    pub fn dropped_batches(&self) -> u64 {
        read(&self.dropped_batches)
    }

    pub fn exported_items(&self) -> u64 {
        read(&self.exported_items)
    }

    /// Submissions refused after shutdown
    pub fn rejected(&self) -> u64 {
        read(&self.rejected)
    }

    pub(crate) fn snapshot(&self, state: SchedulerState, queue_len: usize, queue_capacity: usize) -> PipelineStats {
        PipelineStats {
            state,
            queue_len,
            queue_capacity,
            received: read(&self.received),
            accepted: read(&self.accepted),
            dropped: read(&self.dropped),
            rejected: read(&self.rejected),
            suppressed: read(&self.suppressed),
            exported_items: read(&self.exported_items),
            exported_batches: read(&self.exported_batches),
            dropped_batches: read(&self.dropped_batches),
            dropped_batch_items: read(&self.dropped_batch_items),
            export_attempts: read(&self.export_attempts),
            retries: read(&self.retries),
            export_timeouts: read(&self.export_timeouts),
        }
    }
}

/// Point-in-time view of a batch processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub state: SchedulerState,
    pub queue_len: usize,
    pub queue_capacity: usize,
    /// Every `on_end` call
    pub received: u64,
    /// Items that made it into the ring buffer
    pub accepted: u64,
    /// Items rejected because the ring buffer was full
    pub dropped: u64,
    /// Items submitted after shutdown
    pub rejected: u64,
    /// Items submitted from a suppressed scope
    pub suppressed: u64,
    pub exported_items: u64,
    pub exported_batches: u64,
    pub dropped_batches: u64,
    pub dropped_batch_items: u64,
    pub export_attempts: u64,
    pub retries: u64,
    pub export_timeouts: u64,
}

impl PipelineStats {
    /// Fraction of the ring buffer in use
    pub fn utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            0.0
        } else {
            self.queue_len as f64 / self.queue_capacity as f64
        }
    }
}
