mod model;

use bytes::Bytes;
use filament::trace::{TraceError, TraceResult};
use filament_http::HttpClient;
use filament_sdk::trace::{
    BatchConfig, BatchSpanProcessor, ExportResult, ReportingEntity, SpanExporter, SpanRecord,
    SpanRegistry,
};
use futures_util::future::BoxFuture;
use http::{Method, Request, Uri};
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Default local agent endpoint.
pub const DEFAULT_AGENT_ENDPOINT: &str = "http://127.0.0.1:42699/traces";

/// Default plugin name under which spans are reported.
const DEFAULT_PLUGIN_NAME: &str = "com.filament.runtime";

/// Header informing the agent how many spans the payload carries.
const SPAN_COUNT_HEADER: &str = "x-filament-span-count";

/// Errors raised while building or running the agent exporter.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// The configured endpoint is not a valid URI.
    #[error("invalid agent endpoint: {0}")]
    InvalidEndpoint(#[from] http::uri::InvalidUri),

    /// No HTTP client was configured.
    #[error("no http client, enable the `reqwest-client` feature or provide one")]
    NoHttpClient,

    /// Building the export request failed.
    #[error(transparent)]
    RequestFailed(#[from] http::Error),

    /// Encoding the transport document failed.
    #[error(transparent)]
    EncodingFailed(#[from] serde_json::Error),
}

impl From<Error> for TraceError {
    fn from(error: Error) -> Self {
        TraceError::ExportFailed(error.to_string())
    }
}

/// Exports batches of finished spans to the agent endpoint.
///
/// Each batch becomes one JSON transport document POSTed to the endpoint. A
/// non-success response is an export failure; the caller logs it and
/// discards the batch.
#[derive(Debug)]
pub struct AgentExporter {
    client: Arc<dyn HttpClient>,
    endpoint: Uri,
    plugin_name: String,
    entity_id: String,
}

impl AgentExporter {
    fn new(
        client: Arc<dyn HttpClient>,
        endpoint: Uri,
        plugin_name: String,
        entity_id: String,
    ) -> Self {
        AgentExporter {
            client,
            endpoint,
            plugin_name,
            entity_id,
        }
    }

    fn build_request(&self, batch: &[SpanRecord]) -> Result<Request<Bytes>, Error> {
        let body = model::encode(&self.plugin_name, &self.entity_id, batch)?;
        Ok(Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(SPAN_COUNT_HEADER, batch.len())
            .body(Bytes::from(body))?)
    }
}

impl SpanExporter for AgentExporter {
    fn export(&mut self, batch: Vec<SpanRecord>) -> BoxFuture<'static, ExportResult> {
        let request = match self.build_request(&batch) {
            Ok(request) => request,
            Err(error) => {
                return Box::pin(futures_util::future::ready(Err(error.into())));
            }
        };
        let client = Arc::clone(&self.client);
        Box::pin(async move {
            let response = client
                .send_bytes(request)
                .await
                .map_err(|error| TraceError::ExportFailed(error.to_string()))?;
            if !response.status().is_success() {
                return Err(TraceError::ExportFailed(format!(
                    "agent returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}

/// Creates a new agent pipeline builder.
pub fn new_pipeline() -> AgentPipelineBuilder {
    AgentPipelineBuilder::default()
}

/// Builder wiring the agent exporter, the batching processor and a span
/// registry together.
#[derive(Debug)]
pub struct AgentPipelineBuilder {
    endpoint: String,
    plugin_name: String,
    entity: ReportingEntity,
    client: Option<Arc<dyn HttpClient>>,
    batch_config: Option<BatchConfig>,
    capture_stacks: bool,
}

impl Default for AgentPipelineBuilder {
    fn default() -> Self {
        AgentPipelineBuilder {
            endpoint: DEFAULT_AGENT_ENDPOINT.to_string(),
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
            entity: ReportingEntity::from_process(),
            #[cfg(feature = "reqwest-client")]
            client: Some(Arc::new(reqwest::Client::new())),
            #[cfg(not(feature = "reqwest-client"))]
            client: None,
            batch_config: None,
            capture_stacks: false,
        }
    }
}

impl AgentPipelineBuilder {
    /// Sets the agent endpoint to deliver to.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the plugin name spans are reported under.
    pub fn with_plugin_name<T: Into<String>>(mut self, name: T) -> Self {
        self.plugin_name = name.into();
        self
    }

    /// Sets the reporting-entity identity.
    pub fn with_reporting_entity(mut self, entity: ReportingEntity) -> Self {
        self.entity = entity;
        self
    }

    /// Sets the HTTP client used for delivery.
    pub fn with_http_client<C: HttpClient + 'static>(mut self, client: C) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Overrides the batching configuration.
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.batch_config = Some(config);
        self
    }

    /// Enables call-stack capture at span start.
    pub fn with_stack_capture(mut self, capture: bool) -> Self {
        self.capture_stacks = capture;
        self
    }

    /// Builds the pipeline: exporter, batching processor, registry.
    pub fn install(self) -> TraceResult<SpanRegistry> {
        let client = self.client.ok_or(Error::NoHttpClient)?;
        let endpoint: Uri = self.endpoint.parse().map_err(Error::InvalidEndpoint)?;
        let exporter = AgentExporter::new(
            client,
            endpoint,
            self.plugin_name,
            self.entity.entity_id.clone(),
        );
        let processor =
            BatchSpanProcessor::new(exporter, self.batch_config.unwrap_or_default());
        Ok(SpanRegistry::builder()
            .with_reporting_entity(self.entity)
            .with_stack_capture(self.capture_stacks)
            .with_span_processor(processor)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use filament::SpanKind;
    use filament_http::HttpError;
    use filament_sdk::trace::BatchConfigBuilder;
    use http::{Response, StatusCode};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Client that records requests and answers with a fixed status.
    #[derive(Debug)]
    struct RecordingClient {
        requests: Arc<Mutex<Vec<Request<Bytes>>>>,
        status: StatusCode,
    }

    impl RecordingClient {
        fn new(status: StatusCode) -> (Self, Arc<Mutex<Vec<Request<Bytes>>>>) {
            let requests = Arc::new(Mutex::new(Vec::new()));
            (
                RecordingClient {
                    requests: requests.clone(),
                    status,
                },
                requests,
            )
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            self.requests.lock().unwrap().push(request);
            Ok(Response::builder()
                .status(self.status)
                .body(Bytes::new())?)
        }
    }

    fn test_entity() -> ReportingEntity {
        ReportingEntity {
            entity_id: "99".to_owned(),
            host_id: "test-host".to_owned(),
        }
    }

    #[test]
    fn pipeline_delivers_spans_to_the_agent() {
        let (client, requests) = RecordingClient::new(StatusCode::OK);
        let registry = new_pipeline()
            .with_endpoint("http://127.0.0.1:42699/traces")
            .with_reporting_entity(test_entity())
            .with_http_client(client)
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .build(),
            )
            .install()
            .unwrap();

        registry.in_span("http-server", SpanKind::Entry, |_cx| {});
        registry.force_flush().unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/traces");
        assert_eq!(
            request
                .headers()
                .get(SPAN_COUNT_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("1")
        );

        let document: serde_json::Value = serde_json::from_slice(request.body()).unwrap();
        let plugin = &document["plugins"][0];
        assert_eq!(plugin["name"], "com.filament.runtime");
        assert_eq!(plugin["entityId"], "99");
        assert_eq!(plugin["data"]["spans"][0]["n"], "http-server");
        assert_eq!(plugin["data"]["spans"][0]["f"]["e"], "99");
    }

    #[test]
    fn non_success_status_is_an_export_failure() {
        let (client, _requests) = RecordingClient::new(StatusCode::SERVICE_UNAVAILABLE);
        let mut exporter = AgentExporter::new(
            Arc::new(client),
            DEFAULT_AGENT_ENDPOINT.parse().unwrap(),
            DEFAULT_PLUGIN_NAME.to_string(),
            "99".to_string(),
        );
        let result = futures_executor::block_on(exporter.export(Vec::new()));
        assert!(matches!(result, Err(TraceError::ExportFailed(_))));
    }

    #[test]
    fn install_requires_a_client() {
        let builder = AgentPipelineBuilder {
            client: None,
            ..Default::default()
        };
        assert!(builder.install().is_err());
    }

    #[test]
    fn install_rejects_invalid_endpoints() {
        let (client, _requests) = RecordingClient::new(StatusCode::OK);
        let result = new_pipeline()
            .with_endpoint("not a uri")
            .with_http_client(client)
            .install();
        assert!(result.is_err());
    }
}
