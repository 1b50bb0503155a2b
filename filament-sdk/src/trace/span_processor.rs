//! Processors sitting between span finalization and the exporter.
//!
//! Span completion is frequent and latency-sensitive; transmission is
//! expensive and fallible. A [`SpanProcessor`] decouples the two. The
//! [`BatchSpanProcessor`] is the production choice: a bounded buffer drained
//! by a dedicated background thread. Enqueueing never blocks the
//! instrumented application — when the buffer is full the incoming span is
//! dropped (**drop-newest**: spans already buffered, which include earlier
//! trace roots, are preserved in preference to new arrivals).

use crate::trace::export::{SpanExporter, SpanRecord};
use filament::trace::{TraceError, TraceResult};
use filament::{fil_debug, fil_warn};
use futures_executor::block_on;
use std::cmp::min;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use std::{env, str::FromStr};

/// Delay between two consecutive batch exports, in milliseconds.
pub(crate) const FILAMENT_BSP_SCHEDULE_DELAY: &str = "FILAMENT_BSP_SCHEDULE_DELAY";
pub(crate) const FILAMENT_BSP_SCHEDULE_DELAY_DEFAULT: u64 = 5_000;
/// Maximum number of spans buffered before new arrivals are dropped.
pub(crate) const FILAMENT_BSP_MAX_QUEUE_SIZE: &str = "FILAMENT_BSP_MAX_QUEUE_SIZE";
pub(crate) const FILAMENT_BSP_MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Maximum number of spans per exported batch.
pub(crate) const FILAMENT_BSP_MAX_EXPORT_BATCH_SIZE: &str = "FILAMENT_BSP_MAX_EXPORT_BATCH_SIZE";
pub(crate) const FILAMENT_BSP_MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 512;
/// Maximum time to wait for an export, force-flush or shutdown, in
/// milliseconds.
pub(crate) const FILAMENT_BSP_EXPORT_TIMEOUT: &str = "FILAMENT_BSP_EXPORT_TIMEOUT";
pub(crate) const FILAMENT_BSP_EXPORT_TIMEOUT_DEFAULT: u64 = 30_000;

/// Receives finished spans and forwards them to an exporter.
///
/// `on_end` is called synchronously from `Span::end` and must neither block
/// nor fail into the caller.
pub trait SpanProcessor: Send + Sync + std::fmt::Debug {
    /// Accepts a finished span.
    fn on_end(&self, span: SpanRecord);

    /// Exports whatever is buffered, synchronously.
    fn force_flush(&self) -> TraceResult<()>;

    /// Flushes and releases resources. Must be safe to call twice; the
    /// second call reports an error but does nothing harmful.
    fn shutdown(&self) -> TraceResult<()>;
}

/// A [`SpanProcessor`] that exports every span as soon as it finishes,
/// without batching. Useful for tests and debugging; prefer
/// [`BatchSpanProcessor`] anywhere throughput matters.
#[derive(Debug)]
pub struct SimpleSpanProcessor {
    exporter: Mutex<Box<dyn SpanExporter>>,
}

impl SimpleSpanProcessor {
    /// Creates a processor around the given exporter.
    pub fn new(exporter: Box<dyn SpanExporter>) -> Self {
        Self {
            exporter: Mutex::new(exporter),
        }
    }
}

impl SpanProcessor for SimpleSpanProcessor {
    fn on_end(&self, span: SpanRecord) {
        let result = self
            .exporter
            .lock()
            .map_err(|_| TraceError::Other("SimpleSpanProcessor mutex poisoned".into()))
            .and_then(|mut exporter| block_on(exporter.export(vec![span])));

        if let Err(err) = result {
            fil_debug!(
                name: "SimpleSpanProcessor.ExportFailed",
                reason = format!("{err:?}")
            );
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> TraceResult<()> {
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.shutdown();
            Ok(())
        } else {
            Err(TraceError::Other(
                "SimpleSpanProcessor mutex poisoned at shutdown".into(),
            ))
        }
    }
}

/// Messages exchanged with the drain thread.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
enum BatchMessage {
    ExportSpan(SpanRecord),
    ForceFlush(SyncSender<TraceResult<()>>),
    Shutdown(SyncSender<TraceResult<()>>),
}

/// A [`SpanProcessor`] that buffers finished spans and exports them in
/// batches from a dedicated background thread.
///
/// The buffer is a bounded channel of `max_queue_size` spans. Enqueueing is
/// always non-blocking; when the buffer is full the incoming span is dropped
/// and counted (drop-newest, see the module documentation). The drain thread
/// exports a batch whenever `max_export_batch_size` spans have accumulated
/// or `scheduled_delay` has elapsed, whichever comes first. A failed export
/// is logged and its batch discarded — the processor never retries and never
/// accumulates unbounded state.
#[derive(Debug)]
pub struct BatchSpanProcessor {
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    reply_timeout: Duration,
    is_shutdown: AtomicBool,
    dropped_span_count: Arc<AtomicUsize>,
}

impl BatchSpanProcessor {
    /// Creates a processor with the given exporter and configuration,
    /// spawning the drain thread.
    pub fn new<E>(mut exporter: E, config: BatchConfig) -> Self
    where
        E: SpanExporter + 'static,
    {
        let (message_sender, message_receiver) = sync_channel(config.max_queue_size);
        let reply_timeout = config.max_export_timeout;

        let handle = thread::Builder::new()
            .name("FilamentBatchSpanProcessor".to_string())
            .spawn(move || {
                let mut batch: Vec<SpanRecord> = Vec::with_capacity(config.max_export_batch_size);
                let mut last_export = Instant::now();

                loop {
                    let timeout = config.scheduled_delay.saturating_sub(last_export.elapsed());
                    match message_receiver.recv_timeout(timeout) {
                        Ok(BatchMessage::ExportSpan(span)) => {
                            batch.push(span);
                            if batch.len() >= config.max_export_batch_size
                                || last_export.elapsed() >= config.scheduled_delay
                            {
                                let _ = export_batch(&mut exporter, &mut batch);
                                last_export = Instant::now();
                            }
                        }
                        Ok(BatchMessage::ForceFlush(sender)) => {
                            let result = export_batch(&mut exporter, &mut batch);
                            last_export = Instant::now();
                            let _ = sender.send(result);
                        }
                        Ok(BatchMessage::Shutdown(sender)) => {
                            let result = export_batch(&mut exporter, &mut batch);
                            exporter.shutdown();
                            let _ = sender.send(result);
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            let _ = export_batch(&mut exporter, &mut batch);
                            last_export = Instant::now();
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            let _ = export_batch(&mut exporter, &mut batch);
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn batch span processor thread");

        Self {
            message_sender,
            handle: Mutex::new(Some(handle)),
            reply_timeout,
            is_shutdown: AtomicBool::new(false),
            dropped_span_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Starts building a processor around the given exporter.
    pub fn builder<E>(exporter: E) -> BatchSpanProcessorBuilder<E>
    where
        E: SpanExporter + 'static,
    {
        BatchSpanProcessorBuilder {
            exporter,
            config: BatchConfig::default(),
        }
    }
}

fn export_batch<E: SpanExporter>(exporter: &mut E, batch: &mut Vec<SpanRecord>) -> TraceResult<()> {
    if batch.is_empty() {
        return Ok(());
    }
    // The batch is moved out up front: on failure it is discarded, not
    // retried, so the processor can never accumulate unbounded state.
    let result = block_on(exporter.export(std::mem::take(batch)));
    if let Err(err) = &result {
        fil_warn!(
            name: "BatchSpanProcessor.ExportFailed",
            reason = format!("{err:?}")
        );
    }
    result
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: SpanRecord) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            fil_debug!(name: "BatchSpanProcessor.SpanAfterShutdown");
            return;
        }
        if self
            .message_sender
            .try_send(BatchMessage::ExportSpan(span))
            .is_err()
        {
            // Queue full: the incoming span is the one sacrificed. Warn once,
            // report the total at shutdown.
            if self.dropped_span_count.fetch_add(1, Ordering::Relaxed) == 0 {
                fil_warn!(
                    name: "BatchSpanProcessor.SpanDroppingStarted",
                    message = "span buffer is full; newly finished spans are being dropped \
                               until the drain thread catches up"
                );
            }
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TraceError::Other("processor already shut down".into()));
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .try_send(BatchMessage::ForceFlush(sender))
            .map_err(|_| TraceError::Other("failed to send flush message".into()))?;
        receiver
            .recv_timeout(self.reply_timeout)
            .map_err(|_| TraceError::ExportTimedOut(self.reply_timeout))?
    }

    fn shutdown(&self) -> TraceResult<()> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TraceError::Other("processor already shut down".into()));
        }
        let dropped = self.dropped_span_count.load(Ordering::Relaxed);
        if dropped > 0 {
            fil_warn!(
                name: "BatchSpanProcessor.SpansDropped",
                count = dropped
            );
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .try_send(BatchMessage::Shutdown(sender))
            .map_err(|_| TraceError::Other("failed to send shutdown message".into()))?;
        let result = receiver
            .recv_timeout(self.reply_timeout)
            .map_err(|_| TraceError::ExportTimedOut(self.reply_timeout))?;
        if let Some(handle) = self.handle.lock().ok().and_then(|mut guard| guard.take()) {
            if handle.join().is_err() {
                return Err(TraceError::Other("drain thread panicked".into()));
            }
        }
        result
    }
}

/// Builder for [`BatchSpanProcessor`].
#[derive(Debug)]
pub struct BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    exporter: E,
    config: BatchConfig,
}

impl<E> BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    /// Replaces the batch configuration.
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchSpanProcessorBuilder { config, ..self }
    }

    /// Builds the processor, spawning its drain thread.
    pub fn build(self) -> BatchSpanProcessor {
        BatchSpanProcessor::new(self.exporter, self.config)
    }
}

/// Batch processor configuration. Use [`BatchConfigBuilder`] to customize.
#[derive(Debug)]
pub struct BatchConfig {
    /// Maximum number of buffered spans; beyond it, new arrivals are
    /// dropped.
    pub(crate) max_queue_size: usize,
    /// Delay between two consecutive batch exports.
    pub(crate) scheduled_delay: Duration,
    /// Maximum number of spans in a single exported batch.
    pub(crate) max_export_batch_size: usize,
    /// Maximum time to wait for an export, flush or shutdown.
    pub(crate) max_export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    max_export_timeout: Duration,
}

impl Default for BatchConfigBuilder {
    /// Starts from the default values, overridden by the
    /// `FILAMENT_BSP_MAX_QUEUE_SIZE`, `FILAMENT_BSP_SCHEDULE_DELAY`,
    /// `FILAMENT_BSP_MAX_EXPORT_BATCH_SIZE` and
    /// `FILAMENT_BSP_EXPORT_TIMEOUT` environment variables when set.
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: FILAMENT_BSP_MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: Duration::from_millis(FILAMENT_BSP_SCHEDULE_DELAY_DEFAULT),
            max_export_batch_size: FILAMENT_BSP_MAX_EXPORT_BATCH_SIZE_DEFAULT,
            max_export_timeout: Duration::from_millis(FILAMENT_BSP_EXPORT_TIMEOUT_DEFAULT),
        }
        .init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    /// Sets the maximum queue size. Defaults to 2048.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Sets the delay between consecutive exports. Defaults to 5 seconds.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Sets the maximum batch size. Defaults to 512, clamped to the queue
    /// size.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Sets the export/flush/shutdown timeout. Defaults to 30 seconds.
    pub fn with_max_export_timeout(mut self, max_export_timeout: Duration) -> Self {
        self.max_export_timeout = max_export_timeout;
        self
    }

    /// Builds the configuration, clamping the batch size to the queue size.
    pub fn build(self) -> BatchConfig {
        BatchConfig {
            max_queue_size: self.max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size: min(self.max_export_batch_size, self.max_queue_size),
            max_export_timeout: self.max_export_timeout,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = parse_env::<usize>(FILAMENT_BSP_MAX_QUEUE_SIZE) {
            self.max_queue_size = max_queue_size;
        }
        if let Some(delay_millis) = parse_env::<u64>(FILAMENT_BSP_SCHEDULE_DELAY) {
            self.scheduled_delay = Duration::from_millis(delay_millis);
        }
        if let Some(batch_size) = parse_env::<usize>(FILAMENT_BSP_MAX_EXPORT_BATCH_SIZE) {
            self.max_export_batch_size = batch_size;
        }
        if let Some(timeout_millis) = parse_env::<u64>(FILAMENT_BSP_EXPORT_TIMEOUT) {
            self.max_export_timeout = Duration::from_millis(timeout_millis);
        }
        self
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match T::from_str(&raw) {
        Ok(value) => Some(value),
        Err(_) => {
            fil_warn!(
                name: "BatchConfig.InvalidEnvValue",
                variable = name,
                value = raw
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InMemorySpanExporter, ReportingEntity};
    use filament::{SpanId, SpanKind, TraceId};
    use futures_util::future::BoxFuture;

    fn record(span_id: u64) -> SpanRecord {
        SpanRecord {
            trace_id: TraceId::from(1u128),
            span_id: SpanId::from(span_id),
            parent_span_id: None,
            name: "test".into(),
            kind: SpanKind::Entry,
            timestamp: 0,
            duration: 0,
            error_count: 0,
            payload: serde_json::Map::new(),
            stack: None,
            entity: ReportingEntity {
                entity_id: "1".to_owned(),
                host_id: "test".to_owned(),
            },
        }
    }

    #[test]
    fn simple_processor_exports_immediately() {
        let exporter = InMemorySpanExporter::default();
        let processor = SimpleSpanProcessor::new(Box::new(exporter.clone()));
        processor.on_end(record(1));
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
        processor.shutdown().unwrap();
    }

    #[test]
    fn batch_flushes_on_force_flush() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .build(),
            )
            .build();

        processor.on_end(record(1));
        processor.on_end(record(2));
        // Nothing exported yet: the scheduled delay has not elapsed.
        processor.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 2);
        processor.shutdown().unwrap();
    }

    #[test]
    fn batch_exports_when_batch_size_reached() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_max_queue_size(16)
                    .with_max_export_batch_size(2)
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .build(),
            )
            .build();

        processor.on_end(record(1));
        processor.on_end(record(2));
        processor.on_end(record(3));

        // The first two crossed the batch-size threshold; give the drain
        // thread a moment to process its queue.
        let deadline = Instant::now() + Duration::from_secs(5);
        while exporter.get_finished_spans().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(exporter.get_finished_spans().unwrap().len() >= 2);
        processor.shutdown().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 3);
    }

    #[test]
    fn shutdown_flushes_and_rejects_reuse() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone()).build();

        processor.on_end(record(1));
        processor.shutdown().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);

        assert!(processor.shutdown().is_err());
        assert!(processor.force_flush().is_err());

        // Spans finished after shutdown are silently discarded.
        processor.on_end(record(2));
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    /// Exporter that blocks until released, to hold the drain thread busy.
    #[derive(Debug)]
    struct BlockingExporter {
        release: Arc<std::sync::Condvar>,
        gate: Arc<Mutex<bool>>,
        delegate: InMemorySpanExporter,
    }

    impl SpanExporter for BlockingExporter {
        fn export(&mut self, batch: Vec<SpanRecord>) -> BoxFuture<'static, TraceResult<()>> {
            let mut blocked = self.gate.lock().unwrap();
            while *blocked {
                blocked = self.release.wait(blocked).unwrap();
            }
            drop(blocked);
            self.delegate.export(batch)
        }
    }

    #[test]
    fn batch_drops_newest_when_queue_full() {
        let gate = Arc::new(Mutex::new(true));
        let release = Arc::new(std::sync::Condvar::new());
        let delegate = InMemorySpanExporter::default();
        let exporter = BlockingExporter {
            release: release.clone(),
            gate: gate.clone(),
            delegate: delegate.clone(),
        };

        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_max_queue_size(2)
                    .with_max_export_batch_size(2)
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .build(),
            )
            .build();

        // Fill the queue beyond capacity while the drain thread cannot make
        // progress. The overflowing (newest) spans are the ones dropped.
        for span_id in 1..=8 {
            processor.on_end(record(span_id));
        }

        // Release the exporter, let the drain thread work off the queue,
        // then flush everything that survived.
        *gate.lock().unwrap() = false;
        release.notify_all();
        let deadline = Instant::now() + Duration::from_secs(5);
        while delegate.get_finished_spans().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        processor.shutdown().unwrap();

        let exported = delegate.get_finished_spans().unwrap();
        assert!(!exported.is_empty());
        assert!(exported.len() < 8, "overflowing spans must be dropped");
        // Drop-newest: the earliest spans are the survivors.
        assert_eq!(exported[0].span_id, SpanId::from(1u64));
    }

    #[test]
    fn failed_export_discards_batch_and_continues() {
        #[derive(Debug)]
        struct FailingExporter;

        impl SpanExporter for FailingExporter {
            fn export(&mut self, _batch: Vec<SpanRecord>) -> BoxFuture<'static, TraceResult<()>> {
                Box::pin(futures_util::future::ready(Err(TraceError::ExportFailed(
                    "backend unreachable".to_owned(),
                ))))
            }
        }

        let processor = BatchSpanProcessor::builder(FailingExporter).build();
        processor.on_end(record(1));
        // The failure surfaces in the flush result; the processor remains
        // usable and holds no residual state.
        assert!(processor.force_flush().is_err());
        processor.on_end(record(2));
        assert!(processor.force_flush().is_err());
        let _ = processor.shutdown();
    }

    #[test]
    fn batch_config_from_env() {
        temp_env::with_vars(
            [
                (FILAMENT_BSP_MAX_QUEUE_SIZE, Some("100")),
                (FILAMENT_BSP_SCHEDULE_DELAY, Some("250")),
                (FILAMENT_BSP_MAX_EXPORT_BATCH_SIZE, Some("64")),
                (FILAMENT_BSP_EXPORT_TIMEOUT, Some("1000")),
            ],
            || {
                let config = BatchConfig::default();
                assert_eq!(config.max_queue_size, 100);
                assert_eq!(config.scheduled_delay, Duration::from_millis(250));
                assert_eq!(config.max_export_batch_size, 64);
                assert_eq!(config.max_export_timeout, Duration::from_millis(1000));
            },
        );
    }

    #[test]
    fn invalid_env_values_fall_back_to_defaults() {
        temp_env::with_vars(
            [
                (FILAMENT_BSP_MAX_QUEUE_SIZE, Some("not-a-number")),
                (FILAMENT_BSP_SCHEDULE_DELAY, Some("-3")),
            ],
            || {
                let config = BatchConfig::default();
                assert_eq!(config.max_queue_size, FILAMENT_BSP_MAX_QUEUE_SIZE_DEFAULT);
                assert_eq!(
                    config.scheduled_delay,
                    Duration::from_millis(FILAMENT_BSP_SCHEDULE_DELAY_DEFAULT)
                );
            },
        );
    }

    #[test]
    fn batch_size_is_clamped_to_queue_size() {
        let config = BatchConfigBuilder::default()
            .with_max_queue_size(10)
            .with_max_export_batch_size(100)
            .build();
        assert_eq!(config.max_export_batch_size, 10);
    }
}
