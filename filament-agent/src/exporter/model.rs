//! The wire document posted to the agent.

use crate::exporter::Error;
use filament_sdk::trace::SpanRecord;
use serde::Serialize;

/// Top-level transport document: a list of plugin payloads.
#[derive(Debug, Serialize)]
pub(crate) struct TransportDocument<'a> {
    pub(crate) plugins: Vec<PluginPayload<'a>>,
}

/// One plugin's contribution: who reports, for which entity, and the data.
#[derive(Debug, Serialize)]
pub(crate) struct PluginPayload<'a> {
    pub(crate) name: &'a str,
    #[serde(rename = "entityId")]
    pub(crate) entity_id: &'a str,
    pub(crate) data: PluginData<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PluginData<'a> {
    pub(crate) spans: &'a [SpanRecord],
}

/// Encodes a batch of spans as the transport document.
pub(crate) fn encode(
    plugin_name: &str,
    entity_id: &str,
    batch: &[SpanRecord],
) -> Result<Vec<u8>, Error> {
    let document = TransportDocument {
        plugins: vec![PluginPayload {
            name: plugin_name,
            entity_id,
            data: PluginData { spans: batch },
        }],
    };
    Ok(serde_json::to_vec(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament::{SpanId, SpanKind, TraceId};
    use filament_sdk::trace::ReportingEntity;

    fn record() -> SpanRecord {
        SpanRecord {
            trace_id: TraceId::from(0x11u128),
            span_id: SpanId::from(0x22u64),
            parent_span_id: Some(SpanId::from(0x33u64)),
            name: "db-call".into(),
            kind: SpanKind::Exit,
            timestamp: 1_600_000_000_000,
            duration: 5,
            error_count: 0,
            payload: serde_json::Map::new(),
            stack: None,
            entity: ReportingEntity {
                entity_id: "77".to_owned(),
                host_id: "host".to_owned(),
            },
        }
    }

    #[test]
    fn document_shape() {
        let encoded = encode("com.filament.runtime", "77", &[record()]).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        let plugin = &json["plugins"][0];
        assert_eq!(plugin["name"], "com.filament.runtime");
        assert_eq!(plugin["entityId"], "77");

        let span = &plugin["data"]["spans"][0];
        assert_eq!(span["s"], "0000000000000022");
        assert_eq!(span["p"], "0000000000000033");
        assert_eq!(span["n"], "db-call");
        assert_eq!(span["k"], 2);
        assert_eq!(span["f"]["e"], "77");
    }

    #[test]
    fn empty_batch_is_still_a_valid_document() {
        let encoded = encode("com.filament.runtime", "77", &[]).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(json["plugins"][0]["data"]["spans"], serde_json::json!([]));
    }
}
