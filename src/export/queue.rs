//! The batching export queue.
//!
//! Ending a recorded span pushes its data onto a bounded channel without
//! blocking; when the channel is full the span is dropped, counted, and a
//! warning is logged once. A dedicated worker thread drains the channel into
//! batches and delivers each batch to every registered exporter. A batch is
//! delivered when every exporter accepted it; an exporter that keeps failing
//! after its retries has its copy dropped and logged, without holding up the
//! others or the next flush cycle.
//!
//! Flushes happen on a schedule (five seconds by default), when a batch
//! fills up, on an explicit flush or shutdown, and when the last handle to
//! the queue is dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use futures_executor::block_on;

use crate::export::{ExportResult, SpanData, SpanExporter};
use crate::trace::{TraceError, TraceResult};
use crate::{tracelet_debug, tracelet_error, tracelet_warn};

/// Delay between scheduled flushes, in milliseconds.
const ENV_FLUSH_INTERVAL: &str = "TRACELET_FLUSH_INTERVAL";
/// Maximum number of spans waiting in the channel.
const ENV_MAX_QUEUE_SIZE: &str = "TRACELET_MAX_QUEUE_SIZE";
/// Maximum number of spans delivered in one batch.
const ENV_MAX_BATCH_SIZE: &str = "TRACELET_MAX_BATCH_SIZE";
/// Retries per exporter per batch before the batch is dropped for it.
const ENV_EXPORT_RETRIES: &str = "TRACELET_EXPORT_RETRIES";

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
const DEFAULT_MAX_BATCH_SIZE: usize = 512;
const DEFAULT_EXPORT_RETRIES: usize = 3;

const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_millis(1600);
const RETRY_JITTER_MS: u64 = 100;

/// How long flush and shutdown wait for the worker's acknowledgement.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Tuning knobs for the export queue.
///
/// `Default` reads the `TRACELET_*` environment variables; programmatic
/// values set through the builder win over the environment.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub(crate) max_queue_size: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) max_batch_size: usize,
    pub(crate) max_retries: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfigBuilder::default().build()
    }
}

impl QueueConfig {
    /// Starts building a configuration from the environment-aware defaults.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }
}

/// Builder for [`QueueConfig`].
#[derive(Clone, Debug)]
pub struct QueueConfigBuilder {
    max_queue_size: usize,
    flush_interval: Duration,
    max_batch_size: usize,
    max_retries: usize,
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        QueueConfigBuilder {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_retries: DEFAULT_EXPORT_RETRIES,
        }
        .init_from_env_vars()
    }
}

impl QueueConfigBuilder {
    /// Capacity of the span channel. Spans ending while it is full are
    /// dropped and counted.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size.max(1);
        self
    }

    /// Delay between scheduled flushes.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Number of spans that triggers a flush before the schedule does.
    /// Clamped to the queue size at build time.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Retries per exporter per batch; zero means a single attempt.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> QueueConfig {
        let max_batch_size = self.max_batch_size.min(self.max_queue_size);
        QueueConfig {
            max_queue_size: self.max_queue_size,
            flush_interval: self.flush_interval,
            max_batch_size,
            max_retries: self.max_retries,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(millis) = parse_env::<u64>(ENV_FLUSH_INTERVAL) {
            self.flush_interval = Duration::from_millis(millis);
        }
        if let Some(size) = parse_env::<usize>(ENV_MAX_QUEUE_SIZE) {
            self.max_queue_size = size.max(1);
        }
        if let Some(size) = parse_env::<usize>(ENV_MAX_BATCH_SIZE) {
            self.max_batch_size = size.max(1);
        }
        if let Some(retries) = parse_env::<usize>(ENV_EXPORT_RETRIES) {
            self.max_retries = retries;
        }
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracelet_warn!(
                name: "queue_config_invalid_env_var",
                env_var = name,
                value = raw
            );
            None
        }
    }
}

enum QueueMessage {
    ExportSpan(SpanData),
    RegisterExporter(Box<dyn SpanExporter>),
    ForceFlush(SyncSender<ExportResult>),
    Shutdown(SyncSender<ExportResult>),
}

/// Handle to the queue. Clones share one worker; the worker drains and
/// stops when the last handle drops.
#[derive(Clone, Debug)]
pub(crate) struct ExportQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    sender: SyncSender<QueueMessage>,
    is_shutdown: AtomicBool,
    dropped_spans: AtomicUsize,
    max_queue_size: usize,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl fmt::Debug for QueueInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportQueue")
            .field("max_queue_size", &self.max_queue_size)
            .field("is_shutdown", &self.is_shutdown)
            .field(
                "dropped_spans",
                &self.dropped_spans.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl ExportQueue {
    pub(crate) fn new(config: QueueConfig, exporters: Vec<Box<dyn SpanExporter>>) -> Self {
        let (sender, receiver) = mpsc::sync_channel(config.max_queue_size);
        let max_queue_size = config.max_queue_size;
        let worker = thread::Builder::new()
            .name("tracelet-export-queue".to_string())
            .spawn(move || {
                Worker {
                    config,
                    exporters,
                    receiver,
                    batch: Vec::new(),
                    last_flush: Instant::now(),
                    stopping: false,
                }
                .run()
            })
            .expect("failed to spawn the export queue worker thread");
        ExportQueue {
            inner: Arc::new(QueueInner {
                sender,
                is_shutdown: AtomicBool::new(false),
                dropped_spans: AtomicUsize::new(0),
                max_queue_size,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Queues a finished span. Never blocks; on overflow the span is
    /// dropped and counted, with a warning logged for the first loss.
    pub(crate) fn enqueue(&self, span: SpanData) {
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            self.inner.dropped_spans.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.inner.sender.try_send(QueueMessage::ExportSpan(span)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let previously_dropped =
                    self.inner.dropped_spans.fetch_add(1, Ordering::Relaxed);
                if previously_dropped == 0 {
                    tracelet_warn!(
                        name: "export_queue_full",
                        max_queue_size = self.inner.max_queue_size,
                        message = "spans are being dropped; this warning is logged once"
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracelet_debug!(name: "export_queue_disconnected");
            }
        }
    }

    pub(crate) fn register_exporter(
        &self,
        exporter: Box<dyn SpanExporter>,
    ) -> TraceResult<()> {
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        self.inner
            .sender
            .try_send(QueueMessage::RegisterExporter(exporter))
            .map_err(|_| {
                TraceError::Internal("export queue unavailable for registration".to_string())
            })
    }

    pub(crate) fn force_flush(&self) -> TraceResult<()> {
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let (ack, response) = mpsc::sync_channel(1);
        self.inner
            .sender
            .send(QueueMessage::ForceFlush(ack))
            .map_err(|_| TraceError::Internal("export queue worker is gone".to_string()))?;
        response
            .recv_timeout(ACK_TIMEOUT)
            .map_err(|_| TraceError::ExportTimedOut(ACK_TIMEOUT))?
    }

    pub(crate) fn shutdown(&self) -> TraceResult<()> {
        if self.inner.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let (ack, response) = mpsc::sync_channel(1);
        self.inner
            .sender
            .send(QueueMessage::Shutdown(ack))
            .map_err(|_| TraceError::Internal("export queue worker is gone".to_string()))?;
        let result = response
            .recv_timeout(ACK_TIMEOUT)
            .map_err(|_| TraceError::ExportTimedOut(ACK_TIMEOUT))?;
        let handle = self.inner.worker.lock()?.take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| TraceError::Internal("export queue worker panicked".to_string()))?;
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn dropped_spans(&self) -> usize {
        self.inner.dropped_spans.load(Ordering::Relaxed)
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        if !self.is_shutdown.swap(true, Ordering::Relaxed) {
            let (ack, response) = mpsc::sync_channel(1);
            if self.sender.send(QueueMessage::Shutdown(ack)).is_ok()
                && response.recv_timeout(ACK_TIMEOUT).is_err()
            {
                tracelet_warn!(name: "export_queue_drop_flush_timed_out");
                // Leave the worker detached rather than blocking drop on a
                // wedged exporter.
                return;
            }
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                if handle.join().is_err() {
                    tracelet_error!(name: "export_queue_worker_panicked");
                }
            }
        }
    }
}

struct Worker {
    config: QueueConfig,
    exporters: Vec<Box<dyn SpanExporter>>,
    receiver: Receiver<QueueMessage>,
    batch: Vec<SpanData>,
    last_flush: Instant,
    /// Set when a drain swallows a shutdown request, so the loop still
    /// exits after answering the flush that triggered the drain.
    stopping: bool,
}

impl Worker {
    fn run(mut self) {
        tracelet_debug!(
            name: "export_queue_worker_started",
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            max_batch_size = self.config.max_batch_size
        );
        loop {
            let remaining = self
                .config
                .flush_interval
                .saturating_sub(self.last_flush.elapsed());
            match self.receiver.recv_timeout(remaining) {
                Ok(QueueMessage::ExportSpan(span)) => {
                    self.batch.push(span);
                    if self.batch.len() >= self.config.max_batch_size {
                        let _ = self.flush();
                    }
                }
                Ok(QueueMessage::RegisterExporter(exporter)) => {
                    self.exporters.push(exporter);
                }
                Ok(QueueMessage::ForceFlush(ack)) => {
                    let result = self.drain_and_flush();
                    let _ = ack.try_send(result.map_err(TraceError::ExportFailed));
                    if self.stopping {
                        for exporter in self.exporters.iter_mut() {
                            exporter.shutdown();
                        }
                        tracelet_debug!(name: "export_queue_worker_stopped");
                        return;
                    }
                }
                Ok(QueueMessage::Shutdown(ack)) => {
                    let result = self.drain_and_flush();
                    for exporter in self.exporters.iter_mut() {
                        exporter.shutdown();
                    }
                    let _ = ack.try_send(result.map_err(TraceError::ExportFailed));
                    tracelet_debug!(name: "export_queue_worker_stopped");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let _ = self.flush();
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Every queue handle is gone; deliver what is left.
                    let _ = self.flush();
                    for exporter in self.exporters.iter_mut() {
                        exporter.shutdown();
                    }
                    tracelet_debug!(name: "export_queue_worker_stopped");
                    return;
                }
            }
        }
    }

    /// Pulls everything already sitting in the channel before flushing, so
    /// an explicit flush covers spans queued before the call. Flush requests
    /// encountered while draining share this flush's result.
    fn drain_and_flush(&mut self) -> Result<(), String> {
        let mut pending_acks = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                QueueMessage::ExportSpan(span) => self.batch.push(span),
                QueueMessage::RegisterExporter(exporter) => self.exporters.push(exporter),
                QueueMessage::ForceFlush(ack) => pending_acks.push(ack),
                QueueMessage::Shutdown(ack) => {
                    self.stopping = true;
                    pending_acks.push(ack);
                }
            }
        }
        let result = self.flush();
        for ack in pending_acks {
            let _ = ack.try_send(
                result
                    .as_ref()
                    .map(|_| ())
                    .map_err(|message| TraceError::ExportFailed(message.clone())),
            );
        }
        result
    }

    /// Delivers the current batch to every exporter. Failures are isolated
    /// per exporter; the first error message is reported to the caller after
    /// all exporters have been tried.
    fn flush(&mut self) -> Result<(), String> {
        self.last_flush = Instant::now();
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        let mut first_error: Option<String> = None;
        for exporter in self.exporters.iter_mut() {
            if let Err(err) = export_with_retry(exporter.as_mut(), &batch, &self.config) {
                tracelet_warn!(
                    name: "export_delivery_failed",
                    batch_size = batch.len(),
                    error = err.to_string()
                );
                if first_error.is_none() {
                    first_error = Some(err.to_string());
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(message) => Err(message),
        }
    }
}

fn export_with_retry(
    exporter: &mut dyn SpanExporter,
    batch: &[SpanData],
    config: &QueueConfig,
) -> ExportResult {
    let mut attempt = 0;
    let mut delay = RETRY_INITIAL_DELAY;
    loop {
        match block_on(exporter.export(batch.to_vec())) {
            Ok(()) => return Ok(()),
            Err(err) if attempt < config.max_retries => {
                attempt += 1;
                tracelet_warn!(
                    name: "export_retry",
                    attempt = attempt,
                    error = err.to_string()
                );
                let jitter = Duration::from_millis(subsec_jitter(RETRY_JITTER_MS));
                thread::sleep((delay + jitter).min(RETRY_MAX_DELAY));
                delay = (delay * 2).min(RETRY_MAX_DELAY);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Cheap jitter from the clock's subsecond nanos; good enough to keep
/// retries from synchronizing.
fn subsec_jitter(max_ms: u64) -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
        % (max_ms + 1)
}
