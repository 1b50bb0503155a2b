//! Wire codecs for trace context.
//!
//! Two encodings are supported simultaneously: the [native three-header
//! format](NativePropagator) and the [standard composite
//! format](TraceContextPropagator). The [`AgentPropagator`] combines them
//! with the cross-format precedence rules and is what instrumentation
//! adapters normally use.

mod native;
mod trace_context;

pub use native::{NativePropagator, SPAN_ID_HEADER, TRACE_ID_HEADER, TRACE_LEVEL_HEADER};
pub use trace_context::{TraceContextPropagator, TRACEPARENT_HEADER, TRACESTATE_HEADER};

use filament::propagation::{Extractor, FieldIter, Injector, TextMapPropagator};
use filament::trace::{TraceContext, TraceContextExt};
use filament::Context;

/// The combined codec: injects both supported encodings, decodes with
/// cross-format precedence.
///
/// On extract:
/// - the standard header, when present and well-formed, is authoritative
///   for trace and parent identity;
/// - the native trace-level header is always authoritative for suppression —
///   an explicit level `"0"` suppresses even when the standard header says
///   sampled, and a bare level `"0"` with no identity at all still yields a
///   suppression-only context;
/// - anything missing, partial or malformed degrades to "no context".
#[derive(Debug)]
pub struct AgentPropagator {
    native: NativePropagator,
    standard: TraceContextPropagator,
    fields: Vec<String>,
}

impl Default for AgentPropagator {
    fn default() -> Self {
        AgentPropagator::new()
    }
}

impl AgentPropagator {
    /// Creates the combined codec.
    pub fn new() -> Self {
        let native = NativePropagator::new();
        let standard = TraceContextPropagator::new();
        let fields = native
            .fields()
            .chain(standard.fields())
            .map(|field| field.to_owned())
            .collect();
        AgentPropagator {
            native,
            standard,
            fields,
        }
    }
}

impl TextMapPropagator for AgentPropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        self.native.inject_context(cx, injector);
        self.standard.inject_context(cx, injector);
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        let native = self.native.extract_trace_context(extractor);
        let standard = self.standard.extract_trace_context(extractor).ok();
        let native_level = NativePropagator::extract_level(extractor);

        // Identity precedence: standard wins when both formats decoded.
        let identity = standard
            .as_ref()
            .filter(|tc| tc.is_valid())
            .or(native.as_ref().filter(|tc| tc.is_valid()));

        // Suppression precedence: an explicit native level always wins; the
        // standard sampled flag only decides in its absence.
        let suppressed = match native_level {
            Some(suppressed) => suppressed,
            None => identity.map(|tc| tc.is_suppressed()).unwrap_or(false),
        };

        match identity {
            Some(tc) => cx.with_remote_trace_context(TraceContext::new(
                tc.trace_id(),
                tc.span_id(),
                suppressed,
                tc.trace_state().clone(),
            )),
            None if suppressed => cx.with_remote_trace_context(TraceContext::suppressed_only()),
            None => cx.clone(),
        }
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(&self.fields)
    }
}
