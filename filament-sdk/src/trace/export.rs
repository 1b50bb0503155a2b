//! Span export interface and the backend-facing span record.

use filament::trace::TraceResult;
use filament::{SpanId, SpanKind, TraceId};
use futures_util::future::BoxFuture;
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt::Debug;

/// Result of exporting a batch of spans.
pub type ExportResult = TraceResult<()>;

/// Interface that protocol-specific exporters implement to receive batches
/// of finished spans.
///
/// An exporter is a simple encoder and transmitter: it is never called
/// concurrently for the same instance, must not block indefinitely, and owns
/// no retry logic — a failed batch is reported and discarded by the caller.
pub trait SpanExporter: Send + Sync + Debug {
    /// Exports a batch of finished spans.
    fn export(&mut self, batch: Vec<SpanRecord>) -> BoxFuture<'static, ExportResult>;

    /// Shuts the exporter down. Subsequent `export` calls may fail.
    fn shutdown(&mut self) {}
}

/// Identity of the process reporting spans, transmitted as the `f` field of
/// every record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportingEntity {
    /// Identifier of the reporting entity within its host, typically the
    /// process id.
    #[serde(rename = "e")]
    pub entity_id: String,
    /// Identifier of the host the entity runs on.
    #[serde(rename = "h")]
    pub host_id: String,
}

impl ReportingEntity {
    /// Builds the identity of the current process.
    ///
    /// The host id is taken from `HOSTNAME` when set.
    pub fn from_process() -> Self {
        ReportingEntity {
            entity_id: std::process::id().to_string(),
            host_id: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned()),
        }
    }
}

/// A finalized span in its backend-facing shape.
///
/// Field names are stable wire names: `t`/`s`/`p` identify the span within
/// its trace, `n`/`k` describe the operation, `ts`/`d` carry epoch-millis
/// timing, `ec` the error count, `data` the operation-specific payload and
/// `f` the reporting entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpanRecord {
    /// Trace id shared by all spans of the trace.
    #[serde(rename = "t", serialize_with = "hex_trace_id")]
    pub trace_id: TraceId,
    /// Id of this span.
    #[serde(rename = "s", serialize_with = "hex_span_id")]
    pub span_id: SpanId,
    /// Id of the parent span; absent for the trace root.
    #[serde(
        rename = "p",
        serialize_with = "hex_parent_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_span_id: Option<SpanId>,
    /// Logical operation type, e.g. `http-server` or `db-call`.
    #[serde(rename = "n")]
    pub name: Cow<'static, str>,
    /// Kind code (1 entry, 2 exit, 3 intermediate).
    #[serde(rename = "k", serialize_with = "kind_code")]
    pub kind: SpanKind,
    /// Wall-clock start, milliseconds since the Unix epoch.
    #[serde(rename = "ts")]
    pub timestamp: u64,
    /// Elapsed time in milliseconds, fixed at finalization.
    #[serde(rename = "d")]
    pub duration: u64,
    /// Number of errors recorded; non-zero marks the span as failed.
    #[serde(rename = "ec")]
    pub error_count: u32,
    /// Operation-specific attribute bag, opaque to the core.
    #[serde(rename = "data")]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Call-stack snapshot taken at span start, when enabled.
    #[serde(rename = "stack", skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// The reporting entity that produced this span.
    #[serde(rename = "f")]
    pub entity: ReportingEntity,
}

fn hex_trace_id<S: Serializer>(id: &TraceId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

fn hex_span_id<S: Serializer>(id: &SpanId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

fn hex_parent_id<S: Serializer>(id: &Option<SpanId>, serializer: S) -> Result<S::Ok, S::Error> {
    match id {
        Some(id) => serializer.collect_str(id),
        None => serializer.serialize_none(),
    }
}

fn kind_code<S: Serializer>(kind: &SpanKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(kind.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SpanRecord {
        SpanRecord {
            trace_id: TraceId::from(0xabcdu128),
            span_id: SpanId::from(0x1234u64),
            parent_span_id: None,
            name: "http-server".into(),
            kind: SpanKind::Entry,
            timestamp: 1_500_000_000_000,
            duration: 17,
            error_count: 0,
            payload: serde_json::Map::new(),
            stack: None,
            entity: ReportingEntity {
                entity_id: "4711".to_owned(),
                host_id: "host-1".to_owned(),
            },
        }
    }

    #[test]
    fn record_serializes_with_wire_names() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["t"], "0000000000000000000000000000abcd");
        assert_eq!(json["s"], "0000000000001234");
        assert_eq!(json["n"], "http-server");
        assert_eq!(json["k"], 1);
        assert_eq!(json["ts"], 1_500_000_000_000u64);
        assert_eq!(json["d"], 17);
        assert_eq!(json["ec"], 0);
        assert_eq!(json["f"]["e"], "4711");
        assert_eq!(json["f"]["h"], "host-1");
        // Roots carry no parent field at all.
        assert!(json.get("p").is_none());
        assert!(json.get("stack").is_none());
    }

    #[test]
    fn child_record_carries_parent() {
        let mut child = record();
        child.parent_span_id = Some(SpanId::from(0x99u64));
        let json = serde_json::to_value(child).unwrap();
        assert_eq!(json["p"], "0000000000000099");
    }
}
