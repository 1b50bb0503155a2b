//! Agent backend exporter for the filament tracing agent.
//!
//! Finished spans are transmitted to a local agent process as a JSON
//! document containing a list of plugin payloads; each payload names the
//! reporting plugin, identifies the entity it reports for and carries the
//! span records. The [`AgentExporter`] performs the encoding and the HTTP
//! delivery; the [`AgentPipelineBuilder`] wires exporter, batching processor
//! and span registry together:
//!
//! ```no_run
//! use filament::SpanKind;
//! use filament_agent::new_pipeline;
//!
//! # fn main() -> Result<(), filament::trace::TraceError> {
//! let registry = new_pipeline()
//!     .with_endpoint("http://127.0.0.1:42699/traces")
//!     .with_http_client(reqwest::Client::new())
//!     .install()?;
//!
//! registry.in_span("http-server", SpanKind::Entry, |_cx| {
//!     // ... handle the request ...
//! });
//! # Ok(())
//! # }
//! ```
//!
//! Transmission is fire-and-forget per batch: a failed delivery is logged by
//! the batching processor and the batch discarded, never retried — the agent
//! must not accumulate unbounded state on behalf of the host application.

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]

mod exporter;

pub use exporter::{
    new_pipeline, AgentExporter, AgentPipelineBuilder, Error, DEFAULT_AGENT_ENDPOINT,
};
