use crate::trace::export::{ExportResult, SpanExporter, SpanRecord};
use filament::trace::TraceError;
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};

/// A [`SpanExporter`] that keeps finished spans in memory.
///
/// Useful for tests and debugging: drive the pipeline, then inspect what
/// reached the exporter with [`get_finished_spans`]. Clones share the same
/// storage.
///
/// [`get_finished_spans`]: InMemorySpanExporter::get_finished_spans
///
/// # Examples
///
/// ```
/// use filament::SpanKind;
/// use filament_sdk::trace::{InMemorySpanExporter, SimpleSpanProcessor, SpanRegistry};
///
/// let exporter = InMemorySpanExporter::default();
/// let registry = SpanRegistry::builder()
///     .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
///     .build();
///
/// registry.in_span("db-call", SpanKind::Exit, |_cx| {});
///
/// let spans = exporter.get_finished_spans().unwrap();
/// assert_eq!(spans.len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanRecord>>>,
}

impl Default for InMemorySpanExporter {
    fn default() -> Self {
        InMemorySpanExporterBuilder::new().build()
    }
}

/// Builder for [`InMemorySpanExporter`].
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporterBuilder {}

impl InMemorySpanExporterBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the exporter.
    pub fn build(&self) -> InMemorySpanExporter {
        InMemorySpanExporter {
            spans: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl InMemorySpanExporter {
    /// Returns a copy of the spans exported so far.
    pub fn get_finished_spans(&self) -> Result<Vec<SpanRecord>, TraceError> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .map_err(|err| TraceError::Other(err.to_string()))
    }

    /// Discards all stored spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, batch: Vec<SpanRecord>) -> BoxFuture<'static, ExportResult> {
        let result = self
            .spans
            .lock()
            .map(|mut spans| spans.extend(batch))
            .map_err(|err| TraceError::Other(err.to_string()));
        Box::pin(futures_util::future::ready(result))
    }

    // Stored spans survive `shutdown` so tests can assert on what was
    // flushed by it.
}
