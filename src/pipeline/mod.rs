//! Processing engine between instrumentation call sites and exporters.
//!
//! Producers hand finished items to a [`Processor`]. The [`BatchProcessor`]
//! queues them in a bounded ring buffer and a single background worker turns
//! them into batches for the exporter: on a full batch, on the timer, on
//! force flush and once more at shutdown. [`Pipeline`] wires a batch
//! processor, any extra processors and the metric store together for the
//! host.

pub mod accumulator;
pub mod batch;
pub mod global;
pub mod host;
pub mod processor;
pub mod simple;
pub mod state;
pub mod stats;
mod worker;

pub use accumulator::BatchAccumulator;
pub use batch::{BatchProcessor, BatchProcessorBuilder};
pub use global::{global, set_global, shutdown_global, take_global};
pub use host::{Pipeline, PipelineBuilder};
pub use processor::{Processor, ProcessorChain, SubmitStatus};
pub use simple::SimpleProcessor;
pub use state::{AtomicState, SchedulerState};
pub use stats::{PipelineCounters, PipelineStats};
