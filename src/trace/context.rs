//! Thread-local tracking of the current span.
//!
//! Each thread keeps a stack of active spans. Attaching a span pushes onto
//! the stack and returns a [`ContextGuard`]; dropping the guard pops. Guards
//! carry the stack position they were issued for, so a guard dropped out of
//! order tombstones its own slot instead of popping someone else's span, and
//! the stack never corrupts. When the stack is empty the current span is the
//! no-op sentinel.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::mem;

use crate::trace::span::Span;
use crate::tracelet_warn;

thread_local! {
    static CURRENT_SPAN: RefCell<SpanStack> = RefCell::new(SpanStack::default());
}

/// Restores the previous current span when dropped.
///
/// Guards are `!Send`: the position they hold is only meaningful on the
/// thread that issued it.
#[must_use = "dropping the guard immediately deactivates the span"]
#[derive(Debug)]
pub struct ContextGuard {
    pos: u16,
    // Keeps the guard on the thread that created it.
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if self.pos > SpanStack::BASE_POS && self.pos < SpanStack::MAX_POS {
            // try_with: thread-local storage may already be torn down when
            // guards drop during thread exit.
            let _ = CURRENT_SPAN.try_with(|stack| stack.borrow_mut().pop_id(self.pos));
        }
    }
}

/// Makes `span` the current span on this thread until the guard drops.
pub(crate) fn attach(span: Span) -> ContextGuard {
    let pos = CURRENT_SPAN.with(|stack| stack.borrow_mut().push(span));
    ContextGuard {
        pos,
        _marker: PhantomData,
    }
}

/// The current span on this thread, or the no-op sentinel if none.
pub(crate) fn current() -> Span {
    CURRENT_SPAN.with(|stack| stack.borrow().current.clone())
}

struct SpanStack {
    /// The active span, kept out of the `Vec` for fast access. The sentinel
    /// when the stack is empty.
    current: Span,
    /// Previously active spans. `None` marks slots whose guard was dropped
    /// out of order.
    stack: Vec<Option<Span>>,
}

impl Default for SpanStack {
    fn default() -> Self {
        SpanStack {
            current: Span::noop(),
            stack: Vec::with_capacity(SpanStack::INITIAL_CAPACITY),
        }
    }
}

impl SpanStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    fn push(&mut self, span: Span) -> u16 {
        // Position ids start at one; the sentinel owns the base position.
        let next_pos = self.stack.len() + 1;
        if next_pos < SpanStack::MAX_POS.into() {
            let previous = mem::replace(&mut self.current, span);
            self.stack.push(Some(previous));
            next_pos as u16
        } else {
            tracelet_warn!(
                name: "context_stack_overflow",
                max_depth = SpanStack::MAX_POS,
                message = "span not attached; the returned guard is inert"
            );
            SpanStack::MAX_POS
        }
    }

    fn pop_id(&mut self, pos: u16) {
        let len = self.stack.len() as u16;
        if pos == len {
            // Clear slots tombstoned by earlier out-of-order drops before
            // restoring, so the right span becomes current again.
            while let Some(None) = self.stack.last() {
                let _ = self.stack.pop();
            }
            if let Some(Some(previous)) = self.stack.pop() {
                self.current = previous;
            }
        } else if pos < len {
            tracelet_warn!(
                name: "context_scope_dropped_out_of_order",
                position = pos,
                depth = len
            );
            let _ = self.stack[pos as usize].take();
        } else {
            tracelet_warn!(
                name: "context_scope_position_out_of_bounds",
                position = pos,
                depth = len
            );
        }
    }
}
