//! The standard interoperable propagation format.
//!
//! A single composite `traceparent` header carries version, trace id, parent
//! id and flags; the optional `tracestate` header carries extensible vendor
//! state. This is the channel that lets a trace cross boundaries with
//! non-native tracing systems.

use filament::propagation::{Extractor, FieldIter, Injector, TextMapPropagator};
use filament::trace::{TraceContext, TraceContextExt, TraceState};
use filament::{Context, SpanId, TraceId};
use std::sync::OnceLock;

const SUPPORTED_VERSION: u8 = 0;
const MAX_VERSION: u8 = 254;
/// The composite parent header.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// The vendor-state header.
pub const TRACESTATE_HEADER: &str = "tracestate";

static TRACE_CONTEXT_HEADER_FIELDS: OnceLock<[String; 2]> = OnceLock::new();

fn trace_context_header_fields() -> &'static [String; 2] {
    TRACE_CONTEXT_HEADER_FIELDS
        .get_or_init(|| [TRACEPARENT_HEADER.to_owned(), TRACESTATE_HEADER.to_owned()])
}

/// Propagates trace context in the standard composite format:
/// `traceparent: 00-<32 hex trace id>-<16 hex parent id>-<2 hex flags>`.
///
/// The sampled bit of the flags maps onto the native suppression level:
/// unsampled means suppressed. Decoding validates the format strictly and
/// degrades to "no context" on any violation.
#[derive(Clone, Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    /// Creates a new standard-format propagator.
    pub fn new() -> Self {
        TraceContextPropagator { _private: () }
    }

    /// Decodes the composite parent header, tolerating nothing.
    pub(crate) fn extract_trace_context(
        &self,
        extractor: &dyn Extractor,
    ) -> Result<TraceContext, ()> {
        let header_value = extractor.get(TRACEPARENT_HEADER).unwrap_or("").trim();
        let parts = header_value.split_terminator('-').collect::<Vec<&str>>();
        if parts.len() < 4 {
            return Err(());
        }

        // Future versions may append parts, but version 0 has exactly four.
        let version = u8::from_str_radix(parts[0], 16).map_err(|_| ())?;
        if version > MAX_VERSION || (version == 0 && parts.len() != 4) {
            return Err(());
        }

        // Ids must be full-length lowercase hex.
        if parts[1].len() != 32 || parts[1].chars().any(|c| c.is_ascii_uppercase()) {
            return Err(());
        }
        let trace_id = TraceId::from_hex(parts[1]).map_err(|_| ())?;

        if parts[2].len() != 16 || parts[2].chars().any(|c| c.is_ascii_uppercase()) {
            return Err(());
        }
        let span_id = SpanId::from_hex(parts[2]).map_err(|_| ())?;

        if parts[3].len() != 2 {
            return Err(());
        }
        let flags = u8::from_str_radix(parts[3], 16).map_err(|_| ())?;
        if version == 0 && flags > 2 {
            return Err(());
        }
        let suppressed = flags & 0x01 == 0;

        let trace_state = extractor
            .get(TRACESTATE_HEADER)
            .and_then(TraceState::from_header)
            .unwrap_or(TraceState::NONE);

        let trace_context = TraceContext::new(trace_id, span_id, suppressed, trace_state);
        if !trace_context.is_valid() {
            return Err(());
        }
        Ok(trace_context)
    }
}

impl TextMapPropagator for TraceContextPropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let Some(tc) = cx.trace_context() else {
            return;
        };
        if tc.is_valid() {
            let flags: u8 = if tc.is_suppressed() { 0x00 } else { 0x01 };
            let header_value = format!(
                "{:02x}-{}-{}-{:02x}",
                SUPPORTED_VERSION,
                tc.trace_id(),
                tc.span_id(),
                flags
            );
            injector.set(TRACEPARENT_HEADER, header_value);
            if !tc.trace_state().is_empty() {
                injector.set(TRACESTATE_HEADER, tc.trace_state().header().to_owned());
            }
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.extract_trace_context(extractor)
            .map(|tc| cx.with_remote_trace_context(tc))
            .unwrap_or_else(|_| cx.clone())
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(trace_context_header_fields())
    }
}
