//! Getting finished spans out of the process.
//!
//! Ending a recorded span produces a [`SpanData`] value that is queued and
//! later delivered, in batches, to every registered [`SpanExporter`].

use std::borrow::Cow;
use std::fmt::Debug;
use std::time::SystemTime;

use futures_util::future::BoxFuture;

use crate::trace::{Annotation, SpanContext, SpanId, TraceError};

mod in_memory;
mod logging;
mod queue;

pub use in_memory::InMemorySpanExporter;
pub use logging::LoggingSpanExporter;
pub use queue::{QueueConfig, QueueConfigBuilder};

pub(crate) use queue::ExportQueue;

/// Describes the result of an export.
pub type ExportResult = Result<(), TraceError>;

/// The interface backends implement to receive finished spans.
///
/// Exporters are expected to be simple encoders and transmitters. The queue
/// never calls `export` concurrently for the same exporter, retries failed
/// deliveries a bounded number of times, and isolates each exporter's
/// failures from the others.
pub trait SpanExporter: Send + Sync + Debug {
    /// Delivers a batch of finished spans.
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult>;

    /// Called once when the queue shuts down, after the final flush.
    fn shutdown(&mut self) {}
}

/// Everything recorded for a single finished span.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// The span's identity.
    pub span_context: SpanContext,
    /// The parent's span id, absent for roots.
    pub parent_span_id: Option<SpanId>,
    /// The name fixed at creation.
    pub name: Cow<'static, str>,
    /// When the span started.
    pub start_time: SystemTime,
    /// When the span ended.
    pub end_time: SystemTime,
    /// Timestamped messages in the order they were added.
    pub annotations: Vec<Annotation>,
}
