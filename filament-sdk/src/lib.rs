//! Implementation of the filament tracing agent core.
//!
//! This crate provides the working pieces behind the `filament` API crate:
//!
//! - [`trace`]: the [`SpanRegistry`](trace::SpanRegistry) that creates and
//!   finalizes spans (parenting, exit-span suppression, trace suppression),
//!   the concrete [`Span`](trace::Span), the exporter interface and the
//!   batching span transport.
//! - [`propagation`]: the wire codecs — the native three-header format, the
//!   standard interoperable format, and the combined
//!   [`AgentPropagator`](propagation::AgentPropagator) that applies the
//!   cross-format precedence rules.
//!
//! A typical setup wires an exporter into a
//! [`BatchSpanProcessor`](trace::BatchSpanProcessor) and hands that to a
//! [`SpanRegistry`](trace::SpanRegistry); instrumentation adapters then only
//! interact with the registry and the execution context.

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod propagation;
pub mod trace;
