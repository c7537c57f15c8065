//! Buffered delivery of telemetry events.

use crate::{IngestClient, TransportConfig, TransportError, TransportResult};
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::Arc;
use telemetry_event_types::{call_observer, DeliveryError, TelemetryEvent};
use telemetry_retry_queue::{EventQueue, ProcessOutcome, QueueCallbacks, QueueStats, SendBatchFn};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Called with the number of events after a batch is delivered.
pub type SuccessFn = Arc<dyn Fn(usize) + Send + Sync>;
/// Called with the error after a batch fails delivery.
pub type FailureFn = Arc<dyn Fn(&DeliveryError) + Send + Sync>;

/// Optional observers for transport and retry queue activity.
///
/// Observers run on delivery tasks. A panicking observer is logged and
/// ignored.
#[derive(Clone, Default)]
pub struct TransportCallbacks {
    pub on_success: Option<SuccessFn>,
    pub on_failure: Option<FailureFn>,
    pub queue: QueueCallbacks,
}

impl TransportCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&DeliveryError) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(f));
        self
    }

    pub fn with_queue_callbacks(mut self, queue: QueueCallbacks) -> Self {
        self.queue = queue;
        self
    }
}

impl fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("queue", &self.queue)
            .finish()
    }
}

/// State shared with the timer and threshold flush tasks.
struct Shared {
    sender: SendBatchFn,
    on_success: Option<SuccessFn>,
    on_failure: Option<FailureFn>,
    queue: Option<EventQueue>,
    buffer: Mutex<Vec<TelemetryEvent>>,
}

impl Shared {
    async fn flush(&self) {
        let events = mem::take(&mut *self.buffer.lock());
        self.deliver(events).await;
    }

    /// One delivery attempt. Failed batches go to the retry queue.
    async fn deliver(&self, events: Vec<TelemetryEvent>) {
        if events.is_empty() {
            return;
        }
        let count = events.len();

        match (self.sender)(events.clone()).await {
            Ok(()) => {
                debug!(count, "Telemetry batch delivered");
                if let Some(cb) = &self.on_success {
                    call_observer("on_success", || cb(count));
                }
            }
            Err(error) => {
                warn!(count, error = %error, "Telemetry batch delivery failed");
                if let Some(cb) = &self.on_failure {
                    call_observer("on_failure", || cb(&error));
                }
                match &self.queue {
                    Some(queue) => {
                        let queued = queue
                            .enqueue_many(events, &error)
                            .await
                            .iter()
                            .filter(|outcome| outcome.is_queued())
                            .count();
                        debug!(count, queued, "Failed batch handed to retry queue");
                    }
                    None => warn!(count, "Retry queue disabled, dropping failed batch"),
                }
            }
        }
    }
}

struct Running {
    runtime: Handle,
    shutdown: oneshot::Sender<()>,
    timer: JoinHandle<()>,
}

/// Buffers telemetry events and delivers them in batches.
///
/// A batch is sent when the buffer reaches `batch_size` and on every
/// `flush_interval` tick. Batches that fail delivery are persisted in the
/// retry queue when `enable_dlq` is set.
///
/// ```text
/// send ──► buffer ──┬── batch_size reached ──► spawned flush ──┐
///                   └── flush_interval tick ──► timer flush ───┤
///                                                              ▼
///                       retry queue ◄── failure ◄── send_batch ──► on_success
/// ```
pub struct BatchTransport {
    config: TransportConfig,
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<Running>>,
    in_flight: Mutex<JoinSet<()>>,
}

impl BatchTransport {
    /// Create a transport delivering over HTTP to `config.endpoint`.
    pub fn new(config: TransportConfig, callbacks: TransportCallbacks) -> TransportResult<Self> {
        config.validate()?;
        let client = IngestClient::new(&config)?;
        Self::with_sender(config, callbacks, client.into_sender())
    }

    /// Create a transport delivering through a custom batch sender.
    ///
    /// The same sender is used by the retry queue.
    pub fn with_sender(
        config: TransportConfig,
        callbacks: TransportCallbacks,
        sender: SendBatchFn,
    ) -> TransportResult<Self> {
        config.validate()?;

        let queue = config.enable_dlq.then(|| {
            EventQueue::new(sender.clone(), config.queue.clone(), callbacks.queue.clone())
        });

        Ok(Self {
            shared: Arc::new(Shared {
                sender,
                on_success: callbacks.on_success,
                on_failure: callbacks.on_failure,
                queue,
                buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
            }),
            config,
            lifecycle: Mutex::new(None),
            in_flight: Mutex::new(JoinSet::new()),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The retry queue, when enabled.
    pub fn queue(&self) -> Option<&EventQueue> {
        self.shared.queue.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    /// Events waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    /// Start the flush timer and the retry queue processor.
    pub fn start(&self) -> TransportResult<()> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() {
            warn!("Transport already running");
            return Ok(());
        }

        let period = self.config.flush_interval;
        let shared = self.shared.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let timer = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => shared.flush().await,
                }
            }
        });

        *lifecycle = Some(Running {
            runtime,
            shutdown: shutdown_tx,
            timer,
        });
        drop(lifecycle);

        if let Some(queue) = &self.shared.queue {
            queue.start_processing();
        }

        info!(
            endpoint = %self.config.endpoint,
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            dlq = self.config.enable_dlq,
            "Telemetry transport started"
        );
        Ok(())
    }

    /// Stop the transport and deliver what is left.
    ///
    /// Waits for the timer and any threshold flush in progress, flushes the
    /// remaining buffer once, then stops the retry queue processor. Does
    /// nothing if the transport is not running.
    pub async fn stop(&self) {
        let running = self.lifecycle.lock().take();
        let Some(running) = running else {
            debug!("Transport not running, nothing to stop");
            return;
        };

        let _ = running.shutdown.send(());
        if let Err(e) = running.timer.await {
            warn!(error = %e, "Flush timer ended abnormally");
        }

        let mut in_flight = mem::take(&mut *self.in_flight.lock());
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Threshold flush ended abnormally");
            }
        }

        self.shared.flush().await;

        if let Some(queue) = &self.shared.queue {
            queue.stop_processing().await;
        }

        info!("Telemetry transport stopped");
    }

    /// Buffer an event for delivery. Never blocks on I/O.
    ///
    /// Events sent while the transport is stopped are dropped.
    pub fn send(&self, event: TelemetryEvent) {
        let lifecycle = self.lifecycle.lock();
        let Some(running) = lifecycle.as_ref() else {
            warn!(model = %event.model, "Transport not running, dropping event");
            return;
        };

        let batch = {
            let mut buffer = self.shared.buffer.lock();
            buffer.push(event);
            if buffer.len() >= self.config.batch_size {
                Some(mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(batch) = batch {
            let shared = self.shared.clone();
            let mut in_flight = self.in_flight.lock();
            while in_flight.try_join_next().is_some() {}
            in_flight.spawn_on(async move { shared.deliver(batch).await }, &running.runtime);
        }
    }

    /// Deliver the buffer now as a single batch.
    pub async fn flush(&self) {
        self.shared.flush().await;
    }

    /// Retry queue statistics, `None` when the queue is disabled.
    pub fn get_queue_stats(&self) -> Option<QueueStats> {
        self.shared.queue.as_ref().map(EventQueue::get_stats)
    }

    /// Run one retry pass now, `None` when the queue is disabled.
    pub async fn process_queue(&self) -> Option<ProcessOutcome> {
        match &self.shared.queue {
            Some(queue) => Some(queue.process_queue().await),
            None => None,
        }
    }
}

impl Drop for BatchTransport {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            running.timer.abort();
            let dropped = self.shared.buffer.lock().len();
            warn!(dropped, "Transport dropped while running; call stop() to flush");
        }
    }
}

impl fmt::Debug for BatchTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchTransport")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("buffered", &self.buffered_len())
            .finish()
    }
}

/// Create an HTTP transport with no observers.
pub fn create_transport(config: TransportConfig) -> TransportResult<BatchTransport> {
    BatchTransport::new(config, TransportCallbacks::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_retry_queue::BatchFuture;

    fn noop_sender() -> SendBatchFn {
        Arc::new(|_events: Vec<TelemetryEvent>| -> BatchFuture { Box::pin(async { Ok(()) }) })
    }

    fn config() -> TransportConfig {
        TransportConfig {
            enable_dlq: false,
            ..TransportConfig::new("ak_test")
        }
    }

    fn transport() -> BatchTransport {
        BatchTransport::with_sender(config(), TransportCallbacks::new(), noop_sender()).unwrap()
    }

    #[test]
    fn start_outside_runtime_fails() {
        let transport = transport();
        assert!(matches!(transport.start(), Err(TransportError::NoRuntime)));
        assert!(!transport.is_running());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TransportConfig {
            batch_size: 0,
            ..config()
        };
        let err = BatchTransport::with_sender(config, TransportCallbacks::new(), noop_sender())
            .unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn send_when_stopped_drops_event() {
        let transport = transport();
        transport.send(TelemetryEvent::failure(
            telemetry_event_types::Provider::Anthropic,
            "claude-3-haiku",
            std::time::Duration::from_millis(10),
            "rate limited",
        ));
        assert_eq!(transport.buffered_len(), 0);
    }

    #[test]
    fn dlq_disabled_has_no_queue() {
        let transport = transport();
        assert!(transport.queue().is_none());
        assert!(transport.get_queue_stats().is_none());
    }

    #[test]
    fn callbacks_debug_shows_presence() {
        let callbacks = TransportCallbacks::new().on_success(|_| {});
        let rendered = format!("{:?}", callbacks);
        assert!(rendered.contains("on_success: true"));
        assert!(rendered.contains("on_failure: false"));
    }
}
