//! Generation of trace and span identifiers.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::{rngs, Rng, SeedableRng};

use crate::trace::span_context::{SpanId, TraceId};

/// Produces the identifiers for new spans.
///
/// Implementations must never return [`TraceId::INVALID`] or
/// [`SpanId::INVALID`].
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// A fresh trace identifier for a new root span.
    fn new_trace_id(&self) -> TraceId;

    /// A fresh span identifier.
    fn new_span_id(&self) -> SpanId;
}

/// The default generator: uniformly random identifiers from a thread-local
/// PRNG seeded from the system entropy source.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            loop {
                let id = TraceId::from(rng.gen::<u128>());
                if id != TraceId::INVALID {
                    return id;
                }
            }
        })
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            loop {
                let id = SpanId::from(rng.gen::<u64>());
                if id != SpanId::INVALID {
                    return id;
                }
            }
        })
    }
}

thread_local! {
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_entropy());
}

/// Hands out sequential identifiers starting at one. For tests that need
/// predictable ids.
#[derive(Clone, Debug)]
pub struct IncrementIdGenerator {
    next_trace_id: Arc<AtomicU64>,
    next_span_id: Arc<AtomicU64>,
}

impl IncrementIdGenerator {
    /// Creates a generator whose first trace and span ids are both one.
    pub fn new() -> Self {
        IncrementIdGenerator {
            next_trace_id: Arc::new(AtomicU64::new(1)),
            next_span_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for IncrementIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for IncrementIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        TraceId::from(self.next_trace_id.fetch_add(1, Ordering::Relaxed) as u128)
    }

    fn new_span_id(&self) -> SpanId {
        SpanId::from(self.next_span_id.fetch_add(1, Ordering::Relaxed))
    }
}
