//! Bounded buffering between instrumentation call sites and the export worker.

pub mod ring_buffer;

pub use ring_buffer::RingBuffer;
