//! Trace identity types and the span interface.
//!
//! A *trace* is the tree of all spans sharing one [`TraceId`]; a *span* is a
//! timed record of a single logical operation inside it. This module defines
//! the identifiers, the wire-level [`TraceContext`], the object-safe
//! [`Span`] interface implemented by the SDK, and the glue that places spans
//! into the execution [`Context`](crate::Context).

use std::time::Duration;
use thiserror::Error;

mod ids;
pub(crate) mod scoped;
mod trace_context;

pub use ids::{SpanId, TraceId};
pub use scoped::{get_active_span, SpanRef, TraceContextExt};
pub use trace_context::{TraceContext, TraceState};

/// The relationship of a span's operation to the process boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// The process received work from outside (e.g. an inbound request).
    Entry,
    /// The process called out to another system (e.g. a database query).
    Exit,
    /// A logical sub-operation with no cross-process boundary.
    Intermediate,
}

impl SpanKind {
    /// The numeric code this kind is transmitted as.
    pub const fn code(self) -> u8 {
        match self {
            SpanKind::Entry => 1,
            SpanKind::Exit => 2,
            SpanKind::Intermediate => 3,
        }
    }
}

/// Interface of a span while it is live.
///
/// Implemented by the SDK span; instrumentation code usually reaches spans
/// through [`SpanRef`] on the current context rather than holding them
/// directly. All operations on a span that is not recording (inert, or
/// already ended) are no-ops.
pub trait Span: Send + Sync + std::fmt::Debug {
    /// The wire identity of this span: the trace/span ids a downstream call
    /// should consider its parent.
    fn trace_context(&self) -> &TraceContext;

    /// The kind this span was started with.
    fn kind(&self) -> SpanKind;

    /// Whether this span is still recording information.
    ///
    /// `false` for inert spans and for spans that have been ended.
    fn is_recording(&self) -> bool;

    /// Merges an entry into the span's operation-specific payload bag.
    ///
    /// The payload is opaque to the core; adapters use it for attributes
    /// like method, URL or statement text.
    fn set_payload(&mut self, key: &str, value: serde_json::Value);

    /// Finalizes the span: fixes its duration and hands it off for
    /// transmission.
    ///
    /// Ending a span a second time is a no-op that is logged, never a second
    /// transmission.
    fn end(&mut self);

    /// Finalizes the span recording a failure of the traced operation.
    ///
    /// The error is counted and its message recorded in the payload; it is
    /// otherwise left untouched for the host application to handle.
    fn end_with_error(&mut self, error: &(dyn std::error::Error + 'static));
}

/// Errors raised by trace components.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// Exporting a batch of spans failed.
    #[error("span export failed: {0}")]
    ExportFailed(String),

    /// Exporting a batch of spans did not complete within the deadline.
    #[error("span export timed out after {0:?}")]
    ExportTimedOut(Duration),

    /// Failures not covered by the variants above.
    #[error("{0}")]
    Other(String),
}

/// Result type used by trace operations.
pub type TraceResult<T> = Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_kind_codes() {
        assert_eq!(SpanKind::Entry.code(), 1);
        assert_eq!(SpanKind::Exit.code(), 2);
        assert_eq!(SpanKind::Intermediate.code(), 3);
    }
}
