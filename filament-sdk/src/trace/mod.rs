//! Span creation, lifecycle and transport.
//!
//! The [`SpanRegistry`] is the entry point: it creates spans as children of
//! whatever the execution context says is active, enforces the entry/exit
//! invariants, and hands finished spans to a [`SpanProcessor`]. The
//! [`BatchSpanProcessor`] decouples span completion (frequent,
//! latency-sensitive) from transmission (expensive, fallible) with a bounded
//! buffer and a dedicated drain thread.

mod export;
mod id_generator;
mod in_memory_exporter;
mod registry;
mod span;
mod span_processor;

pub use export::{ExportResult, ReportingEntity, SpanExporter, SpanRecord};
#[cfg(any(test, feature = "testing"))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use in_memory_exporter::{InMemorySpanExporter, InMemorySpanExporterBuilder};
pub use registry::{SpanRegistry, SpanRegistryBuilder};
pub use span::Span;
pub use span_processor::{
    BatchConfig, BatchConfigBuilder, BatchSpanProcessor, BatchSpanProcessorBuilder,
    SimpleSpanProcessor, SpanProcessor,
};
