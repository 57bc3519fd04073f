//! Span backends.
//!
//! [`OpTracer`](crate::OpTracer) only populates and finalizes spans; creating
//! and exporting them is the backend's job. [`TracingBackend`] emits spans
//! through the `tracing` crate using OpenTelemetry field names, and
//! [`InMemoryTracer`] records finished spans for inspection.

mod memory;
mod tracing_backend;

pub use memory::{InMemoryTracer, RecordedSpan, SpanData};
pub use tracing_backend::TracingBackend;

pub use opentelemetry::trace::{SpanKind, Status};

use crate::attribute::AttributeSet;
use crate::context::Context;

/// A live span handle.
///
/// Handles are cheap to clone; every clone refers to the same span.
pub trait TraceSpan: Clone + Send + Sync + 'static {
    fn set_attributes(&self, attributes: &AttributeSet);

    fn set_ok_status(&self);

    fn set_error_status(&self, message: &str);

    /// Finish the span. Spans are single-use; calling this twice has no further effect.
    fn end(&self);
}

/// Creates spans.
pub trait TraceBackend: Send + Sync + 'static {
    type Span: TraceSpan;

    /// Start a span as a child of `parent`, or of the backend's notion of the
    /// current span when there is none.
    fn start_span(&self, parent: Option<&Self::Span>, name: &str, kind: SpanKind) -> Self::Span;

    /// Start a span under the span carried by `ctx` and return a scope carrying the new one.
    fn start(&self, ctx: &Context, name: &str, kind: SpanKind) -> (Context, Self::Span) {
        let span = self.start_span(span_from_context::<Self::Span>(ctx), name, kind);
        let scoped = ctx.with_value(ActiveSpan(span.clone()));
        (scoped, span)
    }
}

struct ActiveSpan<S>(S);

/// The span carried by `ctx`, if any.
pub fn span_from_context<S: TraceSpan>(ctx: &Context) -> Option<&S> {
    ctx.get::<ActiveSpan<S>>().map(|active| &active.0)
}
