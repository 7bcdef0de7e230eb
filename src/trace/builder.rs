//! Span construction: parent resolution, sampling, and activation.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::SystemTime;

use crate::trace::context::{self, ContextGuard};
use crate::trace::sampler::Sampler;
use crate::trace::span::Span;
use crate::trace::span_context::{SpanContext, TraceFlags};
use crate::trace::tracer::Tracer;

/// Where a new span finds its parent.
#[derive(Clone, Debug)]
enum Parent {
    /// Use the current span of the calling thread, resolved when the span
    /// starts. Roots happen naturally when nothing is active.
    Current,
    /// Use the given span, or `None` to force a root even inside an active
    /// scope.
    Explicit(Option<Span>),
}

/// Configures and starts spans for a [`Tracer`].
///
/// [`start`](SpanBuilder::start) returns a span without touching the
/// thread's context; [`start_scoped`](SpanBuilder::start_scoped) also makes
/// it current and ties deactivation and end to the returned guard.
#[derive(Debug)]
pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    name: Cow<'static, str>,
    parent: Parent,
    record_events: Option<bool>,
    sampler: Option<Arc<dyn Sampler>>,
    start_time: Option<SystemTime>,
}

impl<'a> SpanBuilder<'a> {
    pub(crate) fn new(tracer: &'a Tracer, name: Cow<'static, str>) -> Self {
        SpanBuilder {
            tracer,
            name,
            parent: Parent::Current,
            record_events: None,
            sampler: None,
            start_time: None,
        }
    }

    pub(crate) fn with_explicit_parent(
        tracer: &'a Tracer,
        name: Cow<'static, str>,
        parent: Option<&Span>,
    ) -> Self {
        SpanBuilder {
            parent: Parent::Explicit(parent.cloned()),
            ..SpanBuilder::new(tracer, name)
        }
    }

    /// Forces the retention decision instead of consulting a sampler.
    pub fn with_record_events(mut self, record_events: bool) -> Self {
        self.record_events = Some(record_events);
        self
    }

    /// Uses `sampler` for this span instead of the tracer's default.
    pub fn with_sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    /// Overrides the start time, which otherwise is the moment
    /// [`start`](SpanBuilder::start) runs.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Creates the span. The span is not activated; the caller owns its
    /// lifetime and must call [`Span::end`].
    pub fn start(self) -> Span {
        let parent = match &self.parent {
            Parent::Current => {
                let current = context::current();
                if current.span_context().is_valid() {
                    Some(current)
                } else {
                    None
                }
            }
            Parent::Explicit(explicit) => explicit
                .clone()
                .filter(|span| span.span_context().is_valid()),
        };

        let id_generator = self.tracer.id_generator();
        let (trace_id, parent_span_id) = match &parent {
            Some(parent) => (
                parent.span_context().trace_id(),
                Some(parent.span_context().span_id()),
            ),
            None => (id_generator.new_trace_id(), None),
        };
        let span_id = id_generator.new_span_id();

        let record_events = match self.record_events {
            Some(forced) => forced,
            None => {
                let parent_context = parent.as_ref().map(|p| *p.span_context());
                match self.sampler.as_deref() {
                    Some(sampler) => {
                        sampler.should_sample(parent_context.as_ref(), trace_id, &self.name)
                    }
                    None => self.tracer.sampler().should_sample(
                        parent_context.as_ref(),
                        trace_id,
                        &self.name,
                    ),
                }
            }
        };

        let span_context = SpanContext::new(
            trace_id,
            span_id,
            TraceFlags::default().with_sampled(record_events),
        );
        let start_time = self.start_time.unwrap_or_else(SystemTime::now);

        Span::new(
            span_context,
            parent_span_id,
            self.name,
            record_events,
            start_time,
            self.tracer.queue().clone(),
        )
    }

    /// Creates the span, makes it current on this thread, and returns a
    /// guard that restores the previous span and ends this one when dropped,
    /// on every exit path including unwinding.
    pub fn start_scoped(self) -> ScopedSpan {
        let tracer = self.tracer;
        let span = self.start();
        let guard = tracer.with_span(span.clone());
        ScopedSpan {
            span,
            guard: Some(guard),
        }
    }
}

/// A span bound to a lexical scope.
///
/// While the value lives, the span is the thread's current span. Dropping it
/// deactivates and ends the span. Ending the span by hand before the scope
/// closes is allowed; the drop then only deactivates.
#[must_use = "dropping a ScopedSpan immediately ends its span"]
#[derive(Debug)]
pub struct ScopedSpan {
    span: Span,
    guard: Option<ContextGuard>,
}

impl ScopedSpan {
    /// The span this scope controls.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for ScopedSpan {
    fn drop(&mut self) {
        // Deactivate before ending so the span is never current and ended
        // at the same time.
        self.guard.take();
        self.span.end_quietly();
    }
}
