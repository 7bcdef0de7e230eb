//! Span lifecycle, thread-local context propagation, sampling, and the
//! tracer facade.
//!
//! The types here cover the in-process half of tracing: creating spans,
//! keeping track of which one is current, and deciding what gets retained.
//! The other half, getting finished spans out of the process, lives in
//! [`crate::export`].

mod builder;
mod context;
mod id_generator;
mod sampler;
mod span;
mod span_context;
mod tracer;

pub use builder::{ScopedSpan, SpanBuilder};
pub use context::ContextGuard;
pub use id_generator::{IdGenerator, IncrementIdGenerator, RandomIdGenerator};
pub use sampler::{AlwaysSample, NeverSample, ProbabilitySampler, Sampler};
pub use span::{Annotation, Span};
pub use span_context::{SpanContext, SpanId, TraceFlags, TraceId};
pub use tracer::{Tracer, TracerBuilder};

use std::sync::PoisonError;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by span operations and the export pipeline.
///
/// Nothing here is fatal. Exporting is best effort: delivery failures are
/// reported to whoever asked for a flush and otherwise logged and dropped,
/// never raised into the host application.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// An operation was attempted on a span in the wrong state, such as
    /// annotating or ending a span that has already ended.
    #[error("invalid span state: {0}")]
    InvalidState(&'static str),

    /// An exporter rejected a batch after its retries were exhausted.
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// A flush or shutdown acknowledgement did not arrive in time.
    #[error("export timed out after {0:?}")]
    ExportTimedOut(Duration),

    /// The export queue has already been shut down.
    #[error("export queue already shut down")]
    AlreadyShutdown,

    /// Internal bookkeeping failures callers cannot act on, kept out of the
    /// other variants so matching on them stays meaningful.
    #[error("{0}")]
    Internal(String),
}

impl<T> From<PoisonError<T>> for TraceError {
    fn from(err: PoisonError<T>) -> Self {
        TraceError::Internal(err.to_string())
    }
}

/// Shorthand for results carrying a [`TraceError`].
pub type TraceResult<T> = Result<T, TraceError>;
