//! `tracing` layer that turns events into log records and submits them to a
//! processor.
//!
//! Mapping:
//! - level → severity
//! - the `message` field → body
//! - every other field → an attribute, formatted as a string
//! - the event target → the `target` attribute
//! - an error field → the `exception.message` attribute
//!
//! Events raised inside a suppression scope are skipped. The batch worker
//! and every exporter call run suppressed, so nothing the pipeline logs about
//! itself can loop back into it.

use crate::core::time::now_nanos;
use crate::core::{current_trace_context, is_suppressed, Attributes};
use crate::logs::{LogRecord, LogSeverity};
use crate::pipeline::Processor;
use std::fmt::{self, Write};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Forwards `tracing` events at or above `min_level` as [`LogRecord`]s.
pub struct PipelineLayer {
    sink: Arc<dyn Processor>,
    min_level: Level,
}

impl PipelineLayer {
    pub fn new(sink: Arc<dyn Processor>) -> Self {
        Self {
            sink,
            min_level: Level::INFO,
        }
    }

    /// Forward events down to `level` (e.g. `Level::DEBUG` includes debug)
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

struct RecordVisitor<'a> {
    body: &'a mut String,
    attributes: &'a mut Attributes,
}

impl Visit for RecordVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.body.push_str(value);
        } else {
            self.attributes.insert(field.name(), value);
        }
    }

    fn record_error(&mut self, _field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.attributes.insert("exception.message", value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.body, "{:?}", value);
        } else {
            self.attributes.insert(field.name(), format!("{:?}", value));
        }
    }
}

impl<S: Subscriber> Layer<S> for PipelineLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Level ordering: TRACE > DEBUG > INFO > WARN > ERROR
        if *metadata.level() > self.min_level || is_suppressed() {
            return;
        }

        let mut body = String::new();
        let mut attributes = Attributes::new().with("target", metadata.target());
        event.record(&mut RecordVisitor {
            body: &mut body,
            attributes: &mut attributes,
        });

        let mut record = LogRecord::new(now_nanos(), LogSeverity::from(*metadata.level()), body);
        record.attributes = attributes;
        if let Some(context) = current_trace_context() {
            record = record.with_context(&context);
        }

        self.sink.on_end(record.into());
    }
}

impl fmt::Debug for PipelineLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineLayer")
            .field("sink", &self.sink.name())
            .field("min_level", &self.min_level)
            .finish()
    }
}
