//! The span record: a named unit of work with ordered annotations.
//!
//! A [`Span`] is a cheap-to-clone handle; all clones refer to the same
//! record. The record moves through exactly two states, running and ended,
//! and the transition is one way. Ending the span takes its mutable data out
//! of the handle, which is what guarantees that a record reaches the export
//! queue at most once no matter how many handles exist.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;

use crate::export::{ExportQueue, SpanData};
use crate::trace::span_context::{SpanContext, SpanId};
use crate::trace::{TraceError, TraceResult};

/// A timestamped message attached to a running span.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    /// When the annotation was recorded.
    pub timestamp: SystemTime,
    /// The message, in call order relative to the span's other annotations.
    pub message: Cow<'static, str>,
}

/// A handle to a single span record.
///
/// Handles are `Clone + Send + Sync`; the record behind them is guarded by a
/// mutex, so annotations racing with [`end`](Span::end) serialize and the
/// losers observe the ended state.
#[derive(Clone, Debug)]
pub struct Span {
    inner: Arc<SpanInner>,
}

#[derive(Debug)]
struct SpanInner {
    span_context: SpanContext,
    parent_span_id: Option<SpanId>,
    name: Cow<'static, str>,
    record_events: bool,
    state: SpanState,
}

#[derive(Debug)]
enum SpanState {
    /// The sentinel returned when no span is active. Operations on it are
    /// accepted and discarded.
    Noop,
    /// A live record. `Some` while running; taking the data ends the span.
    Started {
        data: Mutex<Option<ActiveData>>,
        queue: ExportQueue,
    },
}

#[derive(Debug)]
struct ActiveData {
    start_time: SystemTime,
    annotations: Vec<Annotation>,
}

impl Span {
    pub(crate) fn new(
        span_context: SpanContext,
        parent_span_id: Option<SpanId>,
        name: Cow<'static, str>,
        record_events: bool,
        start_time: SystemTime,
        queue: ExportQueue,
    ) -> Self {
        Span {
            inner: Arc::new(SpanInner {
                span_context,
                parent_span_id,
                name,
                record_events,
                state: SpanState::Started {
                    data: Mutex::new(Some(ActiveData {
                        start_time,
                        annotations: Vec::new(),
                    })),
                    queue,
                },
            }),
        }
    }

    /// The no-op sentinel span, used where no span is active so callers
    /// never see an absent value.
    pub(crate) fn noop() -> Self {
        static NOOP: OnceLock<Span> = OnceLock::new();
        NOOP.get_or_init(|| Span {
            inner: Arc::new(SpanInner {
                span_context: SpanContext::NONE,
                parent_span_id: None,
                name: Cow::Borrowed(""),
                record_events: false,
                state: SpanState::Noop,
            }),
        })
        .clone()
    }

    /// The span's immutable identity.
    pub fn span_context(&self) -> &SpanContext {
        &self.inner.span_context
    }

    /// The identifier of the parent span, absent for root spans.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.parent_span_id
    }

    /// The name given at creation. Names never change after the span starts.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether this span's record will be handed to the export queue on end.
    pub fn record_events(&self) -> bool {
        self.inner.record_events
    }

    /// Returns `true` while the span is running and retained for export.
    pub fn is_recording(&self) -> bool {
        match &self.inner.state {
            SpanState::Noop => false,
            SpanState::Started { data, .. } => {
                self.inner.record_events
                    && data.lock().map(|d| d.is_some()).unwrap_or(false)
            }
        }
    }

    /// Returns `true` once [`end`](Span::end) has run. The sentinel never
    /// reports ended.
    pub fn has_ended(&self) -> bool {
        match &self.inner.state {
            SpanState::Noop => false,
            SpanState::Started { data, .. } => {
                data.lock().map(|d| d.is_none()).unwrap_or(true)
            }
        }
    }

    /// Appends a timestamped message to the span.
    ///
    /// Call order is preserved. Returns [`TraceError::InvalidState`] if the
    /// span has already ended. On the sentinel this is accepted and
    /// discarded; on a span that is not retained for export the state check
    /// still applies but nothing is stored.
    pub fn add_annotation(&self, message: impl Into<Cow<'static, str>>) -> TraceResult<()> {
        match &self.inner.state {
            SpanState::Noop => Ok(()),
            SpanState::Started { data, .. } => {
                let mut guard = data.lock()?;
                match guard.as_mut() {
                    Some(active) => {
                        if self.inner.record_events {
                            active.annotations.push(Annotation {
                                timestamp: SystemTime::now(),
                                message: message.into(),
                            });
                        }
                        Ok(())
                    }
                    None => Err(TraceError::InvalidState(
                        "annotation added after span ended",
                    )),
                }
            }
        }
    }

    /// Ends the span, recording the end time as now.
    ///
    /// The first call transitions the span to ended and, if it is retained
    /// for export, hands the finished record to the export queue. A second
    /// call returns [`TraceError::InvalidState`]. Ending the sentinel is a
    /// no-op.
    pub fn end(&self) -> TraceResult<()> {
        self.end_with_timestamp(SystemTime::now())
    }

    /// Ends the span with a caller-supplied end time.
    pub fn end_with_timestamp(&self, end_time: SystemTime) -> TraceResult<()> {
        if self.take_ended(end_time)? {
            Ok(())
        } else {
            Err(TraceError::InvalidState("span ended twice"))
        }
    }

    /// Ends the span if it is still running. Scope guards use this so that a
    /// manual `end` inside the scope stays legal.
    pub(crate) fn end_quietly(&self) {
        let _ = self.take_ended(SystemTime::now());
    }

    /// Returns `Ok(true)` if this call performed the transition, `Ok(false)`
    /// if the span had already ended. The sentinel always reports `true`.
    fn take_ended(&self, end_time: SystemTime) -> TraceResult<bool> {
        match &self.inner.state {
            SpanState::Noop => Ok(true),
            SpanState::Started { data, queue } => {
                let taken = data.lock()?.take();
                match taken {
                    Some(active) => {
                        if self.inner.record_events {
                            queue.enqueue(SpanData {
                                span_context: self.inner.span_context,
                                parent_span_id: self.inner.parent_span_id,
                                name: self.inner.name.clone(),
                                start_time: active.start_time,
                                end_time,
                                annotations: active.annotations,
                            });
                        }
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }
}
