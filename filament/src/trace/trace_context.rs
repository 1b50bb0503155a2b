use crate::trace::{SpanId, TraceId};

/// Maximum accepted length of an incoming vendor-state header. Anything
/// longer is discarded rather than amplified through the trace.
const MAX_TRACE_STATE_LEN: usize = 512;

/// The extensible vendor-state string carried alongside the standard
/// propagation header.
///
/// Multiple tracing systems participating in one trace each append their own
/// entries. The content is opaque to this agent: it is validated for basic
/// transportability and passed through unchanged.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TraceState(Option<String>);

impl TraceState {
    /// The empty trace state.
    pub const NONE: TraceState = TraceState(None);

    /// Accepts an incoming vendor-state header value.
    ///
    /// Returns [`TraceState::NONE`] for empty input and `None` for values
    /// that are not safely transportable (control characters, excessive
    /// length).
    pub fn from_header(value: &str) -> Option<TraceState> {
        let value = value.trim();
        if value.is_empty() {
            return Some(TraceState::NONE);
        }
        if value.len() > MAX_TRACE_STATE_LEN || value.chars().any(|c| c.is_control()) {
            return None;
        }
        Some(TraceState(Some(value.to_owned())))
    }

    /// The header value to transmit, empty when no state is carried.
    pub fn header(&self) -> &str {
        self.0.as_deref().unwrap_or("")
    }

    /// Whether any vendor state is carried.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// The wire-level identity of a trace position.
///
/// This is what crosses process boundaries: the span a downstream call
/// should consider its parent, plus the trace-wide suppression level and the
/// interoperable vendor state. It is also the identity a live span carries
/// for its own children.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    suppressed: bool,
    trace_state: TraceState,
}

impl TraceContext {
    /// An empty, invalid trace context.
    pub const NONE: TraceContext = TraceContext {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        suppressed: false,
        trace_state: TraceState::NONE,
    };

    /// Constructs a trace context from its parts.
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        suppressed: bool,
        trace_state: TraceState,
    ) -> Self {
        TraceContext {
            trace_id,
            span_id,
            suppressed,
            trace_state,
        }
    }

    /// A pure "stop tracing" signal: no identity, suppression set.
    ///
    /// Decoded from an incoming trace level of `"0"` with no id headers;
    /// everything started under it stays inert and keeps advertising
    /// suppression downstream.
    pub fn suppressed_only() -> Self {
        TraceContext {
            trace_id: TraceId::INVALID,
            span_id: SpanId::INVALID,
            suppressed: true,
            trace_state: TraceState::NONE,
        }
    }

    /// The trace id shared by every span of this trace.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span id a downstream operation should use as its parent.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Whether tracing is suppressed for this trace.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// The vendor state carried alongside the identifiers.
    pub fn trace_state(&self) -> &TraceState {
        &self.trace_state
    }

    /// Whether both identifiers are present (non-zero).
    ///
    /// A context can be invalid and still meaningful: a pure suppression
    /// signal has no identity.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }

    /// The identity of a child span within the same trace.
    ///
    /// Suppression and vendor state are inherited; only the span id changes.
    pub fn child(&self, span_id: SpanId) -> Self {
        TraceContext {
            trace_id: self.trace_id,
            span_id,
            suppressed: self.suppressed,
            trace_state: self.trace_state.clone(),
        }
    }
}
