//! An exporter that prints finished spans to stdout.

use std::io::Write;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::export::{ExportResult, SpanData, SpanExporter};

/// Writes one human-readable line per finished span, with its annotations
/// indented beneath it. Meant for local development and examples, not as a
/// backend integration.
#[derive(Debug, Default)]
pub struct LoggingSpanExporter {
    service_name: Option<String>,
}

impl LoggingSpanExporter {
    /// An exporter with no service prefix.
    pub fn new() -> Self {
        LoggingSpanExporter::default()
    }

    /// Prefixes every line with the given service name.
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        LoggingSpanExporter {
            service_name: Some(service_name.into()),
        }
    }

    fn write_span(&self, out: &mut impl Write, span: &SpanData) -> std::io::Result<()> {
        if let Some(service) = &self.service_name {
            write!(out, "[{service}] ")?;
        }
        let duration = span
            .end_time
            .duration_since(span.start_time)
            .unwrap_or(Duration::ZERO);
        write!(
            out,
            "span {} trace_id={} span_id={}",
            span.name,
            span.span_context.trace_id(),
            span.span_context.span_id(),
        )?;
        if let Some(parent) = span.parent_span_id {
            write!(out, " parent_span_id={parent}")?;
        }
        writeln!(out, " duration={}us", duration.as_micros())?;
        for annotation in &span.annotations {
            let offset = annotation
                .timestamp
                .duration_since(span.start_time)
                .unwrap_or(Duration::ZERO);
            writeln!(out, "  +{}us {}", offset.as_micros(), annotation.message)?;
        }
        Ok(())
    }
}

impl SpanExporter for LoggingSpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for span in &batch {
            // Best effort: a closed stdout should not fail the batch.
            let _ = self.write_span(&mut out, span);
        }
        let _ = out.flush();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{Annotation, SpanContext, SpanId, TraceFlags, TraceId};
    use std::time::SystemTime;

    #[test]
    fn formats_spans_and_annotations() {
        let exporter = LoggingSpanExporter::with_service_name("frontend");
        let start = SystemTime::UNIX_EPOCH;
        let span = SpanData {
            span_context: SpanContext::new(
                TraceId::from(0xabcu128),
                SpanId::from(0x1u64),
                TraceFlags::SAMPLED,
            ),
            parent_span_id: Some(SpanId::from(0x2u64)),
            name: "render".into(),
            start_time: start,
            end_time: start + Duration::from_millis(3),
            annotations: vec![Annotation {
                timestamp: start + Duration::from_millis(1),
                message: "template resolved".into(),
            }],
        };

        let mut buffer = Vec::new();
        exporter.write_span(&mut buffer, &span).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("[frontend] span render"));
        assert!(text.contains("trace_id=00000000000000000000000000000abc"));
        assert!(text.contains("parent_span_id=0000000000000002"));
        assert!(text.contains("+1000us template resolved"));
    }
}
