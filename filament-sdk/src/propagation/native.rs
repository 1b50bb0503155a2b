//! The native three-header propagation format.

use filament::propagation::{Extractor, FieldIter, Injector, TextMapPropagator};
use filament::trace::{TraceContext, TraceContextExt, TraceState};
use filament::{fil_debug, Context, SpanId, TraceId};
use std::sync::OnceLock;

/// Header carrying the trace id (up to 32 hex characters).
pub const TRACE_ID_HEADER: &str = "x-filament-t";
/// Header carrying the parent span id (up to 16 hex characters).
pub const SPAN_ID_HEADER: &str = "x-filament-s";
/// Header carrying the trace level: `"1"` (trace) or `"0"` (suppress).
pub const TRACE_LEVEL_HEADER: &str = "x-filament-l";

static NATIVE_HEADER_FIELDS: OnceLock<[String; 3]> = OnceLock::new();

fn native_header_fields() -> &'static [String; 3] {
    NATIVE_HEADER_FIELDS.get_or_init(|| {
        [
            TRACE_ID_HEADER.to_owned(),
            SPAN_ID_HEADER.to_owned(),
            TRACE_LEVEL_HEADER.to_owned(),
        ]
    })
}

/// Propagates trace context in the native format: three independent headers
/// for trace id, span id and trace level.
///
/// The three fields are deliberately independent: a trace level of `"0"` is
/// honored as a pure "stop tracing" signal even when both id headers are
/// absent, and id headers without a level default to level 1. Malformed ids
/// degrade to "no context" — propagation never fails the surrounding
/// operation.
#[derive(Clone, Debug, Default)]
pub struct NativePropagator {
    _private: (),
}

impl NativePropagator {
    /// Creates a new native propagator.
    pub fn new() -> Self {
        NativePropagator { _private: () }
    }

    /// Reads the trace level, when present.
    ///
    /// Returns `Some(true)` when tracing is suppressed. The level value may
    /// carry correlation parts after a comma; only the leading token counts.
    pub(crate) fn extract_level(extractor: &dyn Extractor) -> Option<bool> {
        let value = extractor.get(TRACE_LEVEL_HEADER)?;
        let level = value.split(',').next().unwrap_or("").trim();
        match level {
            "0" => Some(true),
            "1" => Some(false),
            _ => {
                fil_debug!(name: "NativePropagator.InvalidTraceLevel", value = value.to_owned());
                None
            }
        }
    }

    fn extract_ids(extractor: &dyn Extractor) -> Option<(TraceId, SpanId)> {
        let trace_id = extractor.get(TRACE_ID_HEADER)?.trim();
        let span_id = extractor.get(SPAN_ID_HEADER)?.trim();
        if trace_id.is_empty() || trace_id.len() > 32 || span_id.is_empty() || span_id.len() > 16 {
            fil_debug!(name: "NativePropagator.MalformedIds");
            return None;
        }
        match (TraceId::from_hex(trace_id), SpanId::from_hex(span_id)) {
            (Ok(trace_id), Ok(span_id))
                if trace_id != TraceId::INVALID && span_id != SpanId::INVALID =>
            {
                Some((trace_id, span_id))
            }
            _ => {
                fil_debug!(name: "NativePropagator.MalformedIds");
                None
            }
        }
    }

    pub(crate) fn extract_trace_context(&self, extractor: &dyn Extractor) -> Option<TraceContext> {
        let level = Self::extract_level(extractor);
        match Self::extract_ids(extractor) {
            Some((trace_id, span_id)) => Some(TraceContext::new(
                trace_id,
                span_id,
                level.unwrap_or(false),
                TraceState::NONE,
            )),
            // A bare level 0 is still meaningful: stop tracing downstream.
            None if level == Some(true) => Some(TraceContext::suppressed_only()),
            None => None,
        }
    }
}

impl TextMapPropagator for NativePropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let Some(tc) = cx.trace_context() else {
            return;
        };
        if tc.is_suppressed() {
            injector.set(TRACE_LEVEL_HEADER, "0".to_owned());
            if tc.is_valid() {
                injector.set(TRACE_ID_HEADER, tc.trace_id().to_string());
                injector.set(SPAN_ID_HEADER, tc.span_id().to_string());
            }
        } else if tc.is_valid() {
            injector.set(TRACE_ID_HEADER, tc.trace_id().to_string());
            injector.set(SPAN_ID_HEADER, tc.span_id().to_string());
            injector.set(TRACE_LEVEL_HEADER, "1".to_owned());
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.extract_trace_context(extractor)
            .map(|tc| cx.with_remote_trace_context(tc))
            .unwrap_or_else(|| cx.clone())
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(native_header_fields())
    }
}
