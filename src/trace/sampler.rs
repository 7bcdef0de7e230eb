//! Sampling decides whether a span is retained for export.
//!
//! The decision is made once, at span creation, and fixed for the span's
//! lifetime. Builders can force it with
//! [`with_record_events`](crate::trace::SpanBuilder::with_record_events);
//! otherwise the sampler attached to the builder or the tracer's default
//! decides.

use std::fmt;

use crate::trace::span_context::{SpanContext, TraceId};

/// Decides whether a new span should be retained for export.
pub trait Sampler: Send + Sync + fmt::Debug {
    /// Returns `true` if the span should record and export its data.
    ///
    /// `parent` is the span context of the resolved parent, if any, and
    /// `trace_id` is the identifier the new span will carry.
    fn should_sample(&self, parent: Option<&SpanContext>, trace_id: TraceId, name: &str) -> bool;
}

/// Retains every span.
#[derive(Clone, Debug, Default)]
pub struct AlwaysSample;

impl Sampler for AlwaysSample {
    fn should_sample(&self, _parent: Option<&SpanContext>, _trace_id: TraceId, _name: &str) -> bool {
        true
    }
}

/// Retains no spans. Useful for muting a tracer without removing it.
#[derive(Clone, Debug, Default)]
pub struct NeverSample;

impl Sampler for NeverSample {
    fn should_sample(&self, _parent: Option<&SpanContext>, _trace_id: TraceId, _name: &str) -> bool {
        false
    }
}

/// Retains a fixed fraction of traces.
///
/// The verdict is a pure function of the trace id, so every span created
/// under the same trace gets the same answer regardless of where the sampler
/// runs.
#[derive(Clone, Debug)]
pub struct ProbabilitySampler {
    prob: f64,
}

impl ProbabilitySampler {
    /// Creates a sampler that retains roughly `prob` of all traces. The
    /// value is clamped to `0.0..=1.0`.
    pub fn new(prob: f64) -> Self {
        ProbabilitySampler {
            prob: prob.clamp(0.0, 1.0),
        }
    }
}

impl Sampler for ProbabilitySampler {
    fn should_sample(&self, _parent: Option<&SpanContext>, trace_id: TraceId, _name: &str) -> bool {
        if self.prob >= 1.0 {
            return true;
        }
        let prob_upper_bound = (self.prob * (1u64 << 63) as f64) as u64;
        let bytes = trace_id.to_bytes();
        let mut low = [0u8; 8];
        low.copy_from_slice(&bytes[8..]);
        let rnd_from_trace_id = u64::from_be_bytes(low) >> 1;
        rnd_from_trace_id < prob_upper_bound
    }
}
