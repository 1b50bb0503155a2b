//! Placing spans into the execution context.

use crate::fil_warn;
use crate::trace::{Span, SpanKind, TraceContext};
use crate::Context;
use std::sync::Mutex;

const NOOP_SPAN: ScopedSpan = ScopedSpan {
    trace_context: TraceContext::NONE,
    kind: None,
    inner: None,
};

/// The span scope held by a [`Context`].
///
/// Either a live span (with the lock-protected span behind it) or a bare
/// remote trace identity decoded from the wire, for which no local span has
/// been started yet.
#[derive(Debug)]
pub(crate) struct ScopedSpan {
    /// Cached wire identity, readable without taking the span lock.
    trace_context: TraceContext,
    /// Kind of the live span; `None` for remote-only scopes. Cached here so
    /// the exit-suppression check does not need the lock either.
    kind: Option<SpanKind>,
    inner: Option<Mutex<Box<dyn Span>>>,
}

impl ScopedSpan {
    pub(crate) fn trace_context(&self) -> &TraceContext {
        &self.trace_context
    }
}

impl From<TraceContext> for ScopedSpan {
    fn from(value: TraceContext) -> Self {
        Self {
            trace_context: value,
            kind: None,
            inner: None,
        }
    }
}

impl<T: Span + 'static> From<T> for ScopedSpan {
    fn from(value: T) -> Self {
        Self {
            trace_context: value.trace_context().clone(),
            kind: Some(value.kind()),
            inner: Some(Mutex::new(Box::new(value))),
        }
    }
}

/// A borrowed reference to the span scope of a context.
///
/// Obtained via [`TraceContextExt::span`]. All operations degrade to no-ops
/// when the context carries no live span, so call sites can stay
/// unconditional.
#[derive(Debug)]
pub struct SpanRef<'a>(&'a ScopedSpan);

impl SpanRef<'_> {
    fn with_inner_mut<F: FnOnce(&mut Box<dyn Span>)>(&self, f: F) {
        if let Some(inner) = &self.0.inner {
            match inner.lock() {
                Ok(mut locked) => f(&mut locked),
                Err(_) => fil_warn!(name: "Span.LockPoisoned"),
            }
        }
    }

    /// The wire identity of this scope.
    pub fn trace_context(&self) -> &TraceContext {
        &self.0.trace_context
    }

    /// The kind of the live span, or `None` when the scope only carries a
    /// remote trace identity.
    pub fn kind(&self) -> Option<SpanKind> {
        self.0.kind
    }

    /// Whether a live, still-recording span backs this scope.
    pub fn is_recording(&self) -> bool {
        self.0
            .inner
            .as_ref()
            .and_then(|inner| inner.lock().ok().map(|span| span.is_recording()))
            .unwrap_or(false)
    }

    /// Merges an entry into the span's payload bag.
    pub fn set_payload(&self, key: &str, value: serde_json::Value) {
        self.with_inner_mut(move |span| span.set_payload(key, value))
    }

    /// Finalizes the span. See [`Span::end`].
    pub fn end(&self) {
        self.with_inner_mut(|span| span.end())
    }

    /// Finalizes the span recording a failure. See [`Span::end_with_error`].
    pub fn end_with_error(&self, error: &(dyn std::error::Error + 'static)) {
        self.with_inner_mut(move |span| span.end_with_error(error))
    }
}

/// Trace-related accessors on [`Context`].
pub trait TraceContextExt {
    /// Returns the current context extended with the given live span.
    fn current_with_span<T: Span + 'static>(span: T) -> Self;

    /// Returns a copy of this context with the given live span.
    fn with_span<T: Span + 'static>(&self, span: T) -> Self;

    /// The span scope of this context, or an inert placeholder when none is
    /// set.
    fn span(&self) -> SpanRef<'_>;

    /// Whether a span scope (live or remote) is set.
    fn has_active_span(&self) -> bool;

    /// Returns a copy of this context carrying a trace identity decoded from
    /// the wire.
    ///
    /// Used by propagators; spans started under the result become children
    /// of the remote span.
    fn with_remote_trace_context(&self, trace_context: TraceContext) -> Self;

    /// The wire identity this context would propagate, if any.
    fn trace_context(&self) -> Option<&TraceContext>;
}

impl TraceContextExt for Context {
    fn current_with_span<T: Span + 'static>(span: T) -> Self {
        Context::map_current(|cx| cx.with_scoped_span(span.into()))
    }

    fn with_span<T: Span + 'static>(&self, span: T) -> Self {
        self.with_scoped_span(span.into())
    }

    fn span(&self) -> SpanRef<'_> {
        match self.span.as_ref() {
            Some(scope) => SpanRef(scope),
            None => SpanRef(&NOOP_SPAN),
        }
    }

    fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    fn with_remote_trace_context(&self, trace_context: TraceContext) -> Self {
        self.with_scoped_span(trace_context.into())
    }

    fn trace_context(&self) -> Option<&TraceContext> {
        self.span.as_ref().map(|scope| scope.trace_context())
    }
}

/// Runs `f` with a reference to the current context's span scope.
///
/// ```
/// use filament::trace::get_active_span;
///
/// get_active_span(|span| {
///     // No live span here: operations are no-ops.
///     assert!(!span.is_recording());
/// });
/// ```
pub fn get_active_span<F, T>(f: F) -> T
where
    F: FnOnce(SpanRef<'_>) -> T,
{
    Context::map_current(|cx| f(cx.span()))
}
