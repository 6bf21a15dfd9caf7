//! Explicit execution context: the active trace and instrumentation suppression.
//!
//! Nothing here is ambient global state. A [`TraceContext`] is either passed by
//! value or scoped over a future with [`with_trace_context`]; suppression is
//! scoped to a thread with [`SuppressionGuard`] or to a task with [`suppressed`].
//! The pipeline runs every exporter call under suppression so that telemetry
//! emitted while exporting never re-enters the pipeline it reports on.

use crate::core::{SpanId, TraceId};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::future::Future;

/// Identity of the span that is currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        Self { trace_id, span_id }
    }

    /// Context for a new child span in the same trace
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
        }
    }
}

tokio::task_local! {
    static TRACE_CONTEXT: TraceContext;
    static TASK_SUPPRESSED: bool;
}

thread_local! {
    static THREAD_SUPPRESSION_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Runs `future` with `context` as the current trace context.
pub async fn with_trace_context<F: Future>(context: TraceContext, future: F) -> F::Output {
    TRACE_CONTEXT.scope(context, future).await
}

/// Trace context of the enclosing [`with_trace_context`] scope, if any.
pub fn current_trace_context() -> Option<TraceContext> {
    TRACE_CONTEXT.try_with(|context| *context).ok()
}

/// Runs `future` with instrumentation suppressed for the whole task.
pub async fn suppressed<F: Future>(future: F) -> F::Output {
    TASK_SUPPRESSED.scope(true, future).await
}

/// True when the caller runs inside a suppression scope (thread or task).
pub fn is_suppressed() -> bool {
    let thread = THREAD_SUPPRESSION_DEPTH.with(|depth| depth.get() > 0);
    thread || TASK_SUPPRESSED.try_with(|flag| *flag).unwrap_or(false)
}

/// Suppresses instrumentation on the current thread until dropped.
///
/// Guards nest; suppression ends when the outermost guard is dropped.
#[must_use = "suppression ends when the guard is dropped"]
pub struct SuppressionGuard {
    // Not Send: the guard must be dropped on the thread that created it.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl SuppressionGuard {
    pub fn enter() -> Self {
        THREAD_SUPPRESSION_DEPTH.with(|depth| depth.set(depth.get().saturating_add(1)));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        THREAD_SUPPRESSION_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
