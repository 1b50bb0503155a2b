//! Span creation and the invariants around it.

use crate::trace::id_generator::{IdGenerator, RandomIdGenerator};
use crate::trace::span::Span;
use crate::trace::span_processor::SpanProcessor;
use crate::trace::{ReportingEntity, SpanRecord};
use filament::trace::{TraceContext, TraceContextExt, TraceResult, TraceState};
use filament::{fil_debug, Context, SpanKind};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Creates, tracks and finalizes spans.
///
/// The registry owns the parenting rules: a new span becomes the child of
/// whatever the execution context designates as active — a live local span,
/// or a remote trace identity decoded from the wire — and the root of a new
/// trace when the context designates nothing. Finished spans are handed to
/// the configured [`SpanProcessor`].
///
/// Cloning a registry is cheap; clones share the same processor and
/// configuration.
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
/// registry.in_span("http-server", SpanKind::Entry, |_cx| {
///     // ... handle the request ...
/// });
///
/// assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct SpanRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    entity: ReportingEntity,
    capture_stacks: bool,
    id_generator: Box<dyn IdGenerator>,
    processor: Box<dyn SpanProcessor>,
}

impl fmt::Debug for RegistryInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryInner")
            .field("entity", &self.entity)
            .field("capture_stacks", &self.capture_stacks)
            .field("id_generator", &self.id_generator)
            .field("processor", &self.processor)
            .finish()
    }
}

impl SpanRegistry {
    /// Starts building a registry.
    pub fn builder() -> SpanRegistryBuilder {
        SpanRegistryBuilder::default()
    }

    /// Starts a span as a child of the currently active context.
    pub fn start_span(&self, name: impl Into<Cow<'static, str>>, kind: SpanKind) -> Span {
        let name = name.into();
        Context::map_current(|cx| self.start_span_with_context(name, kind, cx))
    }

    /// Starts a span as a child of an explicitly provided context.
    ///
    /// Under a suppressed trace, and for an exit span requested while the
    /// context's active span is already an exit span, the returned span is
    /// inert: it carries the existing trace identity for propagation but
    /// records and transmits nothing.
    pub fn start_span_with_context(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        cx: &Context,
    ) -> Span {
        let parent = cx.trace_context().cloned();

        if let Some(parent) = parent {
            if parent.is_suppressed() {
                return Span::inert(parent, kind, self.clone());
            }
            if parent.is_valid() {
                if kind == SpanKind::Exit && cx.span().kind() == Some(SpanKind::Exit) {
                    // An exit nested directly inside a traced exit is not a
                    // new logical operation; fragmenting the trace here
                    // would misrepresent one outbound call as two.
                    fil_debug!(
                        name: "Registry.NestedExitSuppressed",
                        span_id = parent.span_id().to_string()
                    );
                    return Span::inert(parent, kind, self.clone());
                }
                let child = parent.child(self.inner.id_generator.new_span_id());
                return Span::start(
                    child,
                    kind,
                    Some(parent.span_id()),
                    name.into(),
                    self.capture_stack(),
                    self.clone(),
                );
            }
        }

        // Nothing usable is active: this span becomes the root of a new
        // trace.
        let trace_context = TraceContext::new(
            self.inner.id_generator.new_trace_id(),
            self.inner.id_generator.new_span_id(),
            false,
            TraceState::NONE,
        );
        Span::start(
            trace_context,
            kind,
            None,
            name.into(),
            self.capture_stack(),
            self.clone(),
        )
    }

    /// Runs `f` under a context in which a freshly started span is active,
    /// ending the span when `f` returns.
    ///
    /// If `f` unwinds, the span is abandoned rather than guessed at.
    pub fn in_span<T, F>(&self, name: impl Into<Cow<'static, str>>, kind: SpanKind, f: F) -> T
    where
        F: FnOnce(&Context) -> T,
    {
        let span = self.start_span(name, kind);
        let cx = Context::current().with_span(span);
        let guard = cx.clone().attach();
        let result = f(&cx);
        cx.span().end();
        drop(guard);
        result
    }

    /// Flushes buffered spans through the processor.
    pub fn force_flush(&self) -> TraceResult<()> {
        self.inner.processor.force_flush()
    }

    /// Shuts the processor down, flushing what is buffered.
    pub fn shutdown(&self) -> TraceResult<()> {
        self.inner.processor.shutdown()
    }

    pub(crate) fn export_record(&self, record: SpanRecord) {
        self.inner.processor.on_end(record);
    }

    pub(crate) fn reporting_entity(&self) -> &ReportingEntity {
        &self.inner.entity
    }

    fn capture_stack(&self) -> Option<String> {
        if self.inner.capture_stacks {
            Some(std::backtrace::Backtrace::force_capture().to_string())
        } else {
            None
        }
    }
}

/// Builder for [`SpanRegistry`].
#[derive(Debug)]
pub struct SpanRegistryBuilder {
    entity: ReportingEntity,
    capture_stacks: bool,
    id_generator: Box<dyn IdGenerator>,
    processor: Option<Box<dyn SpanProcessor>>,
}

impl Default for SpanRegistryBuilder {
    fn default() -> Self {
        SpanRegistryBuilder {
            entity: ReportingEntity::from_process(),
            capture_stacks: false,
            id_generator: Box::new(RandomIdGenerator::default()),
            processor: None,
        }
    }
}

impl SpanRegistryBuilder {
    /// Sets the reporting-entity identity stamped on every record.
    pub fn with_reporting_entity(mut self, entity: ReportingEntity) -> Self {
        self.entity = entity;
        self
    }

    /// Enables capturing a call-stack snapshot at span start.
    pub fn with_stack_capture(mut self, capture: bool) -> Self {
        self.capture_stacks = capture;
        self
    }

    /// Replaces the id generator.
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, generator: G) -> Self {
        self.id_generator = Box::new(generator);
        self
    }

    /// Sets the processor that receives finished spans.
    pub fn with_span_processor<P: SpanProcessor + 'static>(mut self, processor: P) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    /// Builds the registry.
    ///
    /// Without a configured processor, finished spans are discarded.
    pub fn build(self) -> SpanRegistry {
        SpanRegistry {
            inner: Arc::new(RegistryInner {
                entity: self.entity,
                capture_stacks: self.capture_stacks,
                id_generator: self.id_generator,
                processor: self
                    .processor
                    .unwrap_or_else(|| Box::new(DiscardSpanProcessor)),
            }),
        }
    }
}

/// Fallback processor used when none is configured: finished spans go
/// nowhere.
#[derive(Debug)]
struct DiscardSpanProcessor;

impl SpanProcessor for DiscardSpanProcessor {
    fn on_end(&self, _span: SpanRecord) {}

    fn force_flush(&self) -> TraceResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> TraceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{IncrementIdGenerator, InMemorySpanExporter, SimpleSpanProcessor};
    use filament::trace::Span as _;
    use filament::{SpanId, TraceId};

    fn test_registry(exporter: &InMemorySpanExporter) -> SpanRegistry {
        SpanRegistry::builder()
            .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
            .with_id_generator(IncrementIdGenerator::new())
            .with_reporting_entity(ReportingEntity {
                entity_id: "1".to_owned(),
                host_id: "test".to_owned(),
            })
            .build()
    }

    #[test]
    fn entry_root_and_exit_child_share_a_trace() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        Context::run_in_new_context(|| {
            let root = registry.start_span("http-server", SpanKind::Entry);
            let root_tc = root.trace_context().clone();
            assert!(root.parent_span_id().is_none());

            let cx = Context::current().with_span(root);
            let _guard = cx.attach();

            let mut child = registry.start_span("db-call", SpanKind::Exit);
            assert_eq!(child.trace_context().trace_id(), root_tc.trace_id());
            assert_eq!(child.parent_span_id(), Some(root_tc.span_id()));
            child.end();

            Context::map_current(|cx| cx.span().end());
        });

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].trace_id, spans[1].trace_id);
        assert_eq!(spans[0].name, "db-call");
        assert_eq!(spans[1].name, "http-server");
        assert!(spans[1].parent_span_id.is_none());
        assert_eq!(spans[0].parent_span_id, Some(spans[1].span_id));
    }

    #[test]
    fn exit_inside_exit_reuses_the_existing_span() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        Context::run_in_new_context(|| {
            let outer = registry.start_span("http-client", SpanKind::Exit);
            let outer_id = outer.trace_context().span_id();
            let cx = Context::current().with_span(outer);
            let _guard = cx.attach();

            let mut nested = registry.start_span("socket-write", SpanKind::Exit);
            // Same span id: no new logical operation was created.
            assert_eq!(nested.trace_context().span_id(), outer_id);
            assert!(!nested.is_recording());
            nested.end();

            Context::map_current(|cx| cx.span().end());
        });

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "http-client");
    }

    #[test]
    fn intermediate_under_exit_is_not_suppressed() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        Context::run_in_new_context(|| {
            let outer = registry.start_span("http-client", SpanKind::Exit);
            let cx = Context::current().with_span(outer);
            let _guard = cx.attach();

            let mut nested = registry.start_span("serialize", SpanKind::Intermediate);
            assert!(nested.is_recording());
            nested.end();
            Context::map_current(|cx| cx.span().end());
        });

        assert_eq!(exporter.get_finished_spans().unwrap().len(), 2);
    }

    #[test]
    fn suppressed_context_yields_inert_spans() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        let cx = Context::new().with_remote_trace_context(TraceContext::suppressed_only());
        let _guard = cx.attach();

        let mut span = registry.start_span("http-server", SpanKind::Entry);
        assert!(!span.is_recording());
        assert!(span.trace_context().is_suppressed());
        span.set_payload("http", serde_json::json!({"method": "GET"}));
        span.end();

        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn remote_parent_is_honored() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        let remote = TraceContext::new(
            TraceId::from(0xaaaau128),
            SpanId::from(0xbbbbu64),
            false,
            TraceState::NONE,
        );
        let cx = Context::new().with_remote_trace_context(remote);
        let _guard = cx.attach();

        let mut span = registry.start_span("http-server", SpanKind::Entry);
        assert_eq!(span.trace_context().trace_id(), TraceId::from(0xaaaau128));
        assert_eq!(span.parent_span_id(), Some(SpanId::from(0xbbbbu64)));
        span.end();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].parent_span_id, Some(SpanId::from(0xbbbbu64)));
    }

    #[test]
    fn double_end_transmits_once() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        let mut span = registry.start_span("db-call", SpanKind::Exit);
        span.end();
        span.end();

        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn end_with_error_marks_the_record() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        let mut span = registry.start_span("db-call", SpanKind::Exit);
        let failure = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer hung up");
        span.end_with_error(&failure);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].error_count, 1);
        assert_eq!(spans[0].payload["error"], "peer hung up");
    }

    #[test]
    fn abandoned_span_is_never_transmitted() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        let span = registry.start_span("db-call", SpanKind::Exit);
        drop(span);

        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn stack_capture_is_off_by_default() {
        let exporter = InMemorySpanExporter::default();
        let registry = test_registry(&exporter);

        let mut span = registry.start_span("db-call", SpanKind::Exit);
        span.end();
        assert!(exporter.get_finished_spans().unwrap()[0].stack.is_none());
    }

    #[test]
    fn stack_capture_snapshots_at_start() {
        let exporter = InMemorySpanExporter::default();
        let registry = SpanRegistry::builder()
            .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
            .with_stack_capture(true)
            .build();

        let mut span = registry.start_span("db-call", SpanKind::Exit);
        span.end();
        assert!(exporter.get_finished_spans().unwrap()[0].stack.is_some());
    }
}
