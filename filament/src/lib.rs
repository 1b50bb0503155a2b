//! Core API of the filament in-process tracing agent.
//!
//! The runtimes this agent observes execute work through chains of
//! asynchronous continuations with no built-in notion of "the logical
//! operation currently in progress". This crate provides the substrate that
//! synthetically maintains that notion and the vocabulary types built on top
//! of it:
//!
//! - [`Context`]: the execution-scoped state of one logical task (its active
//!   span and trace identity), with explicit enter/exit and capture/restore
//!   semantics. See the [`context`] module for the suspension-point contract.
//! - [`trace`]: trace identity ([`TraceId`], [`SpanId`], [`TraceContext`])
//!   and the object-safe [`Span`](trace::Span) interface implemented by the
//!   SDK.
//! - [`propagation`]: the [`Injector`](propagation::Injector) /
//!   [`Extractor`](propagation::Extractor) carrier interfaces and the
//!   [`TextMapPropagator`](propagation::TextMapPropagator) codec interface
//!   used to carry trace context across process boundaries.
//!
//! Span creation, the wire codecs and the batching transport live in the
//! `filament-sdk` crate; this crate only defines the interfaces and the
//! context engine they plug into.

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod context;
pub mod propagation;
pub mod trace;

mod internal_logging;

pub use context::{Context, ContextGuard};
pub use trace::{SpanId, SpanKind, TraceContext, TraceId};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
