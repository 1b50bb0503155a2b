//! The concrete span.
//!
//! A span is created by the [`SpanRegistry`](crate::trace::SpanRegistry),
//! owned by the code path that started it (directly or through the execution
//! context), and finalized exactly once: ending it fixes the duration, turns
//! it into a [`SpanRecord`] and hands that to the processor. A span that is
//! started but never ended is abandoned — dropped without transmission —
//! since the core cannot guess the outcome of an operation it did not see
//! finish.

use crate::trace::registry::SpanRegistry;
use crate::trace::SpanRecord;
use filament::trace::TraceContext;
use filament::{fil_debug, SpanId, SpanKind};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single recorded operation within a trace.
#[derive(Debug)]
pub struct Span {
    trace_context: TraceContext,
    kind: SpanKind,
    parent_span_id: Option<SpanId>,
    /// `Some` while the span is live; taken exactly once at finalization.
    /// Inert spans are born empty.
    data: Option<SpanData>,
    registry: SpanRegistry,
}

#[derive(Debug)]
struct SpanData {
    name: Cow<'static, str>,
    start: SystemTime,
    payload: Map<String, Value>,
    error_count: u32,
    stack: Option<String>,
}

impl Span {
    pub(crate) fn start(
        trace_context: TraceContext,
        kind: SpanKind,
        parent_span_id: Option<SpanId>,
        name: Cow<'static, str>,
        stack: Option<String>,
        registry: SpanRegistry,
    ) -> Self {
        Span {
            trace_context,
            kind,
            parent_span_id,
            data: Some(SpanData {
                name,
                start: SystemTime::now(),
                payload: Map::new(),
                error_count: 0,
                stack,
            }),
            registry,
        }
    }

    /// A span that records and transmits nothing but still carries a trace
    /// identity for propagation.
    ///
    /// Returned for operations under a suppressed trace and for exit
    /// operations nested directly inside another exit operation, so call
    /// sites can stay unconditional.
    pub(crate) fn inert(trace_context: TraceContext, kind: SpanKind, registry: SpanRegistry) -> Self {
        Span {
            trace_context,
            kind,
            parent_span_id: None,
            data: None,
            registry,
        }
    }

    /// The id of this span's parent, absent for a trace root.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    fn end_internal(&mut self, error: Option<&(dyn std::error::Error + 'static)>) {
        let Some(data) = self.data.take() else {
            // Inert span, or a second finalization; either way nothing may
            // be transmitted.
            fil_debug!(name: "Span.EndSkipped", span_id = self.trace_context.span_id().to_string());
            return;
        };

        let mut payload = data.payload;
        let mut error_count = data.error_count;
        if let Some(error) = error {
            error_count += 1;
            payload.insert("error".to_owned(), Value::String(error.to_string()));
        }

        let timestamp = data
            .start
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let duration = data.start.elapsed().unwrap_or_default().as_millis() as u64;

        self.registry.export_record(SpanRecord {
            trace_id: self.trace_context.trace_id(),
            span_id: self.trace_context.span_id(),
            parent_span_id: self.parent_span_id,
            name: data.name,
            kind: self.kind,
            timestamp,
            duration,
            error_count,
            payload,
            stack: data.stack,
            entity: self.registry.reporting_entity().clone(),
        });
    }
}

impl filament::trace::Span for Span {
    fn trace_context(&self) -> &TraceContext {
        &self.trace_context
    }

    fn kind(&self) -> SpanKind {
        self.kind
    }

    fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    fn set_payload(&mut self, key: &str, value: Value) {
        if let Some(data) = self.data.as_mut() {
            data.payload.insert(key.to_owned(), value);
        }
    }

    fn end(&mut self) {
        self.end_internal(None);
    }

    fn end_with_error(&mut self, error: &(dyn std::error::Error + 'static)) {
        self.end_internal(Some(error));
    }
}
