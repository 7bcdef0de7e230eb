//! An in-process tracing core: spans with ordered annotations, thread-local
//! scoped context propagation, and batched export to pluggable backends.
//!
//! The tracer is an injected value, not a process global. Build one, clone
//! it wherever spans are created, and register exporters for wherever the
//! finished spans should go:
//!
//! ```
//! use tracelet::export::InMemorySpanExporter;
//! use tracelet::trace::Tracer;
//!
//! let exporter = InMemorySpanExporter::default();
//! let tracer = Tracer::builder().with_exporter(exporter.clone()).build();
//!
//! {
//!     let scope = tracer.span_builder("load_config").start_scoped();
//!     scope.span().add_annotation("parsed 3 files").unwrap();
//!     // Anything started here becomes a child of `load_config`.
//!     let lookup = tracer.span_builder("resolve_overrides").start();
//!     lookup.end().unwrap();
//! } // the scope ends `load_config` on every exit path
//!
//! tracer.force_flush().unwrap();
//! let spans = exporter.get_finished_spans().unwrap();
//! assert_eq!(spans.len(), 2);
//! ```
//!
//! Tracing never takes the host application down with it: ending a span
//! enqueues without blocking, a full queue drops and counts, and exporter
//! failures are retried, logged, and dropped rather than raised.

#![warn(missing_docs, unreachable_pub)]

pub mod export;
pub mod trace;

mod internal_logging;

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
