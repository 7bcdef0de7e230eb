//! An exporter that buffers finished spans in memory, for tests and
//! assertions about what would have been exported.

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::export::{ExportResult, SpanData, SpanExporter};
use crate::trace::TraceResult;

/// Collects finished spans into a shared vector.
///
/// Clones share the same buffer, so a test can keep one clone and hand the
/// other to the tracer:
///
/// ```
/// use tracelet::export::InMemorySpanExporter;
/// use tracelet::trace::Tracer;
///
/// let exporter = InMemorySpanExporter::default();
/// let tracer = Tracer::builder().with_exporter(exporter.clone()).build();
///
/// tracer.span_builder("work").start().end().unwrap();
/// tracer.force_flush().unwrap();
///
/// assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanExporter {
    /// A copy of every span delivered so far.
    pub fn get_finished_spans(&self) -> TraceResult<Vec<SpanData>> {
        Ok(self.spans.lock()?.clone())
    }

    /// Clears the buffer.
    pub fn reset(&self) -> TraceResult<()> {
        self.spans.lock()?.clear();
        Ok(())
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let spans = self.spans.clone();
        Box::pin(async move {
            spans.lock()?.extend(batch);
            Ok(())
        })
    }
}
