//! The tracer facade: the single object applications hold.
//!
//! A [`Tracer`] is built once, cloned freely, and passed to the code that
//! needs it. There is no process-global instance; ownership is explicit.
//! The tracer owns the default sampler, the id generator, and the export
//! queue, while the current-span bookkeeping stays thread local.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::export::{ExportQueue, QueueConfig, SpanExporter};
use crate::trace::builder::SpanBuilder;
use crate::trace::context::{self, ContextGuard};
use crate::trace::id_generator::{IdGenerator, RandomIdGenerator};
use crate::trace::sampler::{AlwaysSample, Sampler};
use crate::trace::span::Span;
use crate::trace::TraceResult;

/// Creates spans, tracks the current span, and feeds the export queue.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    sampler: Arc<dyn Sampler>,
    id_generator: Box<dyn IdGenerator>,
    queue: ExportQueue,
}

impl Tracer {
    /// Starts configuring a new tracer.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    /// The current span on this thread, or the no-op sentinel if none is
    /// active. The sentinel accepts every operation and discards it, so
    /// callers never need to test for absence.
    pub fn current_span(&self) -> Span {
        context::current()
    }

    /// Makes an existing span current on this thread until the returned
    /// guard drops. The guard only deactivates; the caller still ends the
    /// span.
    pub fn with_span(&self, span: Span) -> ContextGuard {
        context::attach(span)
    }

    /// A builder for a span parented on the current span at start time.
    pub fn span_builder(&self, name: impl Into<Cow<'static, str>>) -> SpanBuilder<'_> {
        SpanBuilder::new(self, name.into())
    }

    /// A builder with the parent fixed up front. Passing `None` forces a
    /// root span even when a scope is active.
    pub fn span_builder_with_explicit_parent(
        &self,
        name: impl Into<Cow<'static, str>>,
        parent: Option<&Span>,
    ) -> SpanBuilder<'_> {
        SpanBuilder::with_explicit_parent(self, name.into(), parent)
    }

    /// Registers another exporter with the running queue. Subsequent batches
    /// are delivered to it as well.
    pub fn register_exporter(&self, exporter: impl SpanExporter + 'static) -> TraceResult<()> {
        self.inner.queue.register_exporter(Box::new(exporter))
    }

    /// Delivers everything currently queued and waits for the result.
    pub fn force_flush(&self) -> TraceResult<()> {
        self.inner.queue.force_flush()
    }

    /// Flushes outstanding spans, shuts the exporters down, and stops the
    /// queue worker. Spans ended afterwards are silently discarded.
    pub fn shutdown(&self) -> TraceResult<()> {
        self.inner.queue.shutdown()
    }

    pub(crate) fn sampler(&self) -> &dyn Sampler {
        self.inner.sampler.as_ref()
    }

    pub(crate) fn id_generator(&self) -> &dyn IdGenerator {
        self.inner.id_generator.as_ref()
    }

    pub(crate) fn queue(&self) -> &ExportQueue {
        &self.inner.queue
    }
}

impl fmt::Debug for Tracer {
    /// Formats the tracer without dumping the queue internals.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("sampler", &self.inner.sampler)
            .field("id_generator", &self.inner.id_generator)
            .finish()
    }
}

/// Configures and builds a [`Tracer`].
#[derive(Debug)]
pub struct TracerBuilder {
    sampler: Arc<dyn Sampler>,
    id_generator: Box<dyn IdGenerator>,
    exporters: Vec<Box<dyn SpanExporter>>,
    queue_config: Option<QueueConfig>,
}

impl Default for TracerBuilder {
    fn default() -> Self {
        TracerBuilder {
            sampler: Arc::new(AlwaysSample),
            id_generator: Box::new(RandomIdGenerator::default()),
            exporters: Vec::new(),
            queue_config: None,
        }
    }
}

impl TracerBuilder {
    /// The default sampling decision for spans that neither force retention
    /// nor carry their own sampler. Defaults to [`AlwaysSample`].
    pub fn with_sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    /// The id source for new spans. Defaults to [`RandomIdGenerator`].
    pub fn with_id_generator(mut self, id_generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Box::new(id_generator);
        self
    }

    /// Adds an exporter that will receive every delivered batch. May be
    /// called multiple times; each exporter is delivered to independently.
    pub fn with_exporter(mut self, exporter: impl SpanExporter + 'static) -> Self {
        self.exporters.push(Box::new(exporter));
        self
    }

    /// Overrides the export queue configuration. Without this the
    /// environment-aware defaults of [`QueueConfig`] apply.
    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = Some(config);
        self
    }

    /// Builds the tracer and starts its export queue worker.
    pub fn build(self) -> Tracer {
        let config = self.queue_config.unwrap_or_default();
        Tracer {
            inner: Arc::new(TracerInner {
                sampler: self.sampler,
                id_generator: self.id_generator,
                queue: ExportQueue::new(config, self.exporters),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemorySpanExporter;
    use crate::trace::id_generator::IncrementIdGenerator;
    use crate::trace::sampler::NeverSample;
    use crate::trace::span_context::{SpanId, TraceId};

    fn tracer_and_exporter() -> (Tracer, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::builder().with_exporter(exporter.clone()).build();
        (tracer, exporter)
    }

    #[test]
    fn scoped_child_inherits_trace_and_parent() {
        let (tracer, exporter) = tracer_and_exporter();
        {
            let parent = tracer.span_builder("parent").start_scoped();
            let child = tracer.span_builder("child").start();
            assert_eq!(
                child.span_context().trace_id(),
                parent.span().span_context().trace_id()
            );
            assert_eq!(
                child.parent_span_id(),
                Some(parent.span().span_context().span_id())
            );
            child.end().unwrap();
        }
        tracer.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 2);
    }

    #[test]
    fn explicit_parent_overrides_context() {
        let (tracer, _exporter) = tracer_and_exporter();
        let elsewhere = tracer.span_builder("elsewhere").start();
        {
            let _scope = tracer.span_builder("active").start_scoped();
            let child = tracer
                .span_builder_with_explicit_parent("child", Some(&elsewhere))
                .start();
            assert_eq!(
                child.span_context().trace_id(),
                elsewhere.span_context().trace_id()
            );
            assert_eq!(
                child.parent_span_id(),
                Some(elsewhere.span_context().span_id())
            );
            child.end().unwrap();
        }
        elsewhere.end().unwrap();
    }

    #[test]
    fn explicit_none_forces_a_root_inside_a_scope() {
        let (tracer, _exporter) = tracer_and_exporter();
        let _scope = tracer.span_builder("active").start_scoped();
        let root = tracer
            .span_builder_with_explicit_parent("forced-root", None)
            .start();
        assert_ne!(
            root.span_context().trace_id(),
            tracer.current_span().span_context().trace_id()
        );
        assert_eq!(root.parent_span_id(), None);
        root.end().unwrap();
    }

    #[test]
    fn never_sample_suppresses_export() {
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::builder()
            .with_sampler(NeverSample)
            .with_exporter(exporter.clone())
            .build();
        let span = tracer.span_builder("quiet").start();
        assert!(!span.record_events());
        assert!(!span.span_context().is_sampled());
        span.end().unwrap();
        tracer.force_flush().unwrap();
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn forced_record_events_beats_the_sampler() {
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::builder()
            .with_sampler(NeverSample)
            .with_exporter(exporter.clone())
            .build();
        let span = tracer
            .span_builder("insistent")
            .with_record_events(true)
            .start();
        assert!(span.record_events());
        assert!(span.span_context().is_sampled());
        span.end().unwrap();
        tracer.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn per_span_sampler_beats_the_default() {
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::builder()
            .with_sampler(NeverSample)
            .with_exporter(exporter.clone())
            .build();
        let span = tracer
            .span_builder("opt-in")
            .with_sampler(AlwaysSample)
            .start();
        assert!(span.record_events());
        span.end().unwrap();
        tracer.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn start_does_not_activate() {
        let (tracer, _exporter) = tracer_and_exporter();
        let span = tracer.span_builder("detached").start();
        assert!(!tracer.current_span().span_context().is_valid());
        span.end().unwrap();
    }

    #[test]
    fn with_span_activates_without_taking_ownership() {
        let (tracer, exporter) = tracer_and_exporter();
        let span = tracer.span_builder("borrowed").start();
        {
            let _guard = tracer.with_span(span.clone());
            assert_eq!(
                tracer.current_span().span_context(),
                span.span_context()
            );
            tracer.current_span().add_annotation("inside").unwrap();
        }
        // The guard only deactivated; the span is still ours to end.
        assert!(!span.has_ended());
        span.end().unwrap();
        tracer.force_flush().unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].annotations[0].message, "inside");
    }

    #[test]
    fn deterministic_ids_with_increment_generator() {
        let exporter = InMemorySpanExporter::default();
        let tracer = Tracer::builder()
            .with_id_generator(IncrementIdGenerator::new())
            .with_exporter(exporter.clone())
            .build();
        let root = tracer.span_builder("first").start();
        assert_eq!(root.span_context().trace_id(), TraceId::from(1u128));
        assert_eq!(root.span_context().span_id(), SpanId::from(1u64));
        let second = tracer
            .span_builder_with_explicit_parent("second", Some(&root))
            .start();
        assert_eq!(second.span_context().trace_id(), TraceId::from(1u128));
        assert_eq!(second.span_context().span_id(), SpanId::from(2u64));
        root.end().unwrap();
        second.end().unwrap();
    }

    #[test]
    fn tracer_debug_is_compact() {
        let (tracer, _exporter) = tracer_and_exporter();
        let formatted = format!("{tracer:?}");
        assert!(formatted.contains("Tracer"));
        assert!(!formatted.contains("queue"));
    }
}
