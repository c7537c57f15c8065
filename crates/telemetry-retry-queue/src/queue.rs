//! Durable retry queue with a background processor.

use crate::backoff;
use crate::store::QueueStore;
use crate::{EventQueueConfig, QueueEntry, QueueResult, QueueStats, SendBatchFn};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use telemetry_event_types::{call_observer, DeliveryError, TelemetryEvent};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Called once per event delivered by a retry pass.
pub type EventProcessedFn = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;
/// Called once when an entry is moved to the dead-letter store.
pub type EventFailedFn = Arc<dyn Fn(&QueueEntry, &DeliveryError) + Send + Sync>;
/// Called with the current size when an event is dropped at capacity.
pub type QueueFullFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Optional observers for queue activity.
#[derive(Clone, Default)]
pub struct QueueCallbacks {
    pub on_event_processed: Option<EventProcessedFn>,
    pub on_event_failed: Option<EventFailedFn>,
    pub on_queue_full: Option<QueueFullFn>,
}

impl QueueCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event_processed<F>(mut self, f: F) -> Self
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        self.on_event_processed = Some(Arc::new(f));
        self
    }

    pub fn on_event_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&QueueEntry, &DeliveryError) + Send + Sync + 'static,
    {
        self.on_event_failed = Some(Arc::new(f));
        self
    }

    pub fn on_queue_full<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_queue_full = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for QueueCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueCallbacks")
            .field("on_event_processed", &self.on_event_processed.is_some())
            .field("on_event_failed", &self.on_event_failed.is_some())
            .field("on_queue_full", &self.on_queue_full.is_some())
            .finish()
    }
}

/// What happened to an event handed to [`EventQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Persisted under the given entry id.
    Queued(String),
    /// Dropped because the active store was full.
    Dropped { queue_size: usize },
    /// The active store could not be written; the event was not kept.
    NotPersisted,
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Per-pass counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Ready entries handed to the sender.
    pub attempted: usize,
    /// Entries delivered and removed.
    pub delivered: usize,
    /// Entries that failed and were given a later retry time.
    pub rescheduled: usize,
    /// Entries that exhausted their retries.
    pub dead_lettered: usize,
}

/// Result of [`EventQueue::process_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Another pass was running.
    Skipped,
    /// No entry was due.
    NothingReady,
    Completed(PassSummary),
}

/// Single-flight state of retry passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Idle,
    Processing,
}

struct Processor {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: EventQueueConfig,
    store: QueueStore,
    send_batch: SendBatchFn,
    callbacks: QueueCallbacks,
    stats: Mutex<QueueStats>,
    /// Ids written to the dead-letter store whose active copy could not be removed.
    dead_lettered: Mutex<HashSet<String>>,
    state: watch::Sender<ProcessingState>,
    processor: Mutex<Option<Processor>>,
}

/// Resets the pass state to idle when dropped, including on cancellation.
struct PassGuard<'a> {
    state: &'a watch::Sender<ProcessingState>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(ProcessingState::Idle);
    }
}

/// File-backed queue of events whose first delivery failed.
///
/// Entries are re-sent through the injected [`SendBatchFn`] once their
/// retry time passes, with exponential backoff between attempts. After
/// `max_retries` failed re-attempts an entry is moved to the dead-letter
/// store and never retried automatically.
///
/// Cloning is cheap; clones share the same store and processor.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("storage_dir", &self.inner.config.storage_dir)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl EventQueue {
    /// Create a queue rooted at `config.storage_dir`.
    ///
    /// The directory is created if missing and persisted statistics are
    /// loaded. Storage failures are logged; the queue still starts.
    pub fn new(
        send_batch: SendBatchFn,
        config: EventQueueConfig,
        callbacks: QueueCallbacks,
    ) -> Self {
        let store = QueueStore::new(config.storage_dir.clone());
        if let Err(e) = store.ensure_dir() {
            warn!(
                storage_dir = %config.storage_dir.display(),
                error = %e,
                "Failed to create retry queue directory"
            );
        }

        let stats = match store.load_stats() {
            Ok(Some(stats)) => stats,
            Ok(None) => QueueStats::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load retry queue stats, starting fresh");
                QueueStats::default()
            }
        };

        let (state, _) = watch::channel(ProcessingState::Idle);
        let inner = Arc::new(Inner {
            config,
            store,
            send_batch,
            callbacks,
            stats: Mutex::new(stats),
            dead_lettered: Mutex::new(HashSet::new()),
            state,
            processor: Mutex::new(None),
        });
        let stats = inner.refresh_stats();
        inner.log_debug_counts("Retry queue opened", &stats);
        Self { inner }
    }

    pub fn config(&self) -> &EventQueueConfig {
        &self.inner.config
    }

    /// Whether a retry pass is running right now.
    pub fn is_processing(&self) -> bool {
        *self.inner.state.borrow() == ProcessingState::Processing
    }

    /// Whether the background processor has been started and not stopped.
    pub fn is_started(&self) -> bool {
        self.inner.processor.lock().is_some()
    }

    /// Persist an event whose delivery failed.
    ///
    /// The first re-attempt is scheduled one base delay from now. Events
    /// arriving while the active store is full are dropped. Blocks on file
    /// I/O; async callers should prefer [`EventQueue::enqueue_many`].
    pub fn enqueue(&self, event: TelemetryEvent, error: &DeliveryError) -> EnqueueOutcome {
        self.inner
            .admit(vec![event], error)
            .pop()
            .unwrap_or(EnqueueOutcome::NotPersisted)
    }

    /// Persist a failed batch with one read and one append.
    ///
    /// Runs on the blocking pool. Outcomes are returned in event order;
    /// events past capacity are dropped and each one notifies
    /// `on_queue_full`.
    pub async fn enqueue_many(
        &self,
        events: Vec<TelemetryEvent>,
        error: &DeliveryError,
    ) -> Vec<EnqueueOutcome> {
        let count = events.len();
        let error = error.clone();
        self.blocking(move |inner| inner.admit(events, &error))
            .await
            .unwrap_or_else(|| vec![EnqueueOutcome::NotPersisted; count])
    }

    /// Start the background processor.
    ///
    /// Runs a pass immediately and then every `process_interval_ms`. Ticks
    /// that fall due while a pass is running are skipped. Must be called
    /// from within a Tokio runtime; otherwise nothing is started.
    pub fn start_processing(&self) {
        let mut processor = self.inner.processor.lock();
        if processor.is_some() {
            warn!("Retry queue processing already started");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "No Tokio runtime, retry queue processing not started");
                return;
            }
        };

        let period = self.inner.config.process_interval();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        EventQueue { inner }.process_queue().await;
                    }
                }
            }
        });

        *processor = Some(Processor {
            shutdown: shutdown_tx,
            handle,
        });
        info!(interval_ms = period.as_millis() as u64, "Retry queue processing started");
    }

    /// Stop the background processor and wait for any running pass.
    ///
    /// Final statistics are persisted before returning. Safe to call more
    /// than once.
    pub async fn stop_processing(&self) {
        let processor = self.inner.processor.lock().take();
        if let Some(processor) = processor {
            let _ = processor.shutdown.send(());
            if let Err(e) = processor.handle.await {
                warn!(error = %e, "Retry queue processor ended abnormally");
            }
            info!("Retry queue processing stopped");
        }

        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == ProcessingState::Idle).await;

        self.blocking(|inner| inner.persist_stats()).await;
    }

    fn begin_pass(&self) -> Option<PassGuard<'_>> {
        let acquired = self.inner.state.send_if_modified(|state| {
            if *state == ProcessingState::Idle {
                *state = ProcessingState::Processing;
                true
            } else {
                false
            }
        });
        acquired.then(|| PassGuard {
            state: &self.inner.state,
        })
    }

    /// Run store work on the blocking pool so file I/O never stalls a
    /// runtime worker.
    async fn blocking<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&Inner) -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        match tokio::task::spawn_blocking(move || f(&inner)).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "Retry queue storage task failed");
                None
            }
        }
    }

    /// Run one retry pass over the entries that are due.
    pub async fn process_queue(&self) -> ProcessOutcome {
        let Some(_pass) = self.begin_pass() else {
            if self.inner.config.debug {
                debug!("Retry pass already running, skipping");
            }
            return ProcessOutcome::Skipped;
        };

        let (total, ready) = match self.blocking(|inner| inner.load_ready()).await {
            Some(Ok(loaded)) => loaded,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to read retry queue");
                return ProcessOutcome::NothingReady;
            }
            None => return ProcessOutcome::NothingReady,
        };

        if ready.is_empty() {
            if self.inner.config.debug {
                debug!(queued = total, "No queued events ready for retry");
            }
            return ProcessOutcome::NothingReady;
        }

        if self.inner.config.debug {
            debug!(queued = total, ready = ready.len(), "Processing queued events");
        }

        let mut summary = PassSummary::default();
        for chunk in ready.chunks(self.inner.config.process_batch_size.max(1)) {
            summary.attempted += chunk.len();
            let events: Vec<TelemetryEvent> = chunk.iter().map(|e| e.event.clone()).collect();
            let chunk = chunk.to_vec();

            match (self.inner.send_batch)(events).await {
                Ok(()) => {
                    summary.delivered += self
                        .blocking(move |inner| inner.complete_batch(&chunk))
                        .await
                        .unwrap_or(0);
                }
                Err(error) => {
                    let counts = self
                        .blocking(move |inner| inner.fail_batch(&chunk, &error))
                        .await;
                    if let Some((rescheduled, dead)) = counts {
                        summary.rescheduled += rescheduled;
                        summary.dead_lettered += dead;
                    }
                }
            }
        }

        self.blocking(|inner| {
            inner.refresh_stats();
            inner.persist_stats();
        })
        .await;

        if summary.delivered > 0 || summary.dead_lettered > 0 {
            info!(
                attempted = summary.attempted,
                delivered = summary.delivered,
                rescheduled = summary.rescheduled,
                dead_lettered = summary.dead_lettered,
                "Retry pass finished"
            );
        }
        ProcessOutcome::Completed(summary)
    }

    /// Snapshot of statistics with live counts recomputed from the active store.
    pub fn get_stats(&self) -> QueueStats {
        self.inner.refresh_stats()
    }

    /// Drop every active entry. The dead-letter store and lifetime counters are kept.
    pub fn clear_queue(&self) -> QueueResult<()> {
        self.inner.store.clear_active()?;
        self.inner.dead_lettered.lock().clear();
        {
            let mut stats = self.inner.stats.lock();
            stats.queued_count = 0;
            stats.ready_count = 0;
            stats.corrupt_count = 0;
        }
        self.inner.persist_stats();
        info!("Retry queue cleared");
        Ok(())
    }

    /// Entries currently awaiting retry.
    pub fn entries(&self) -> QueueResult<Vec<QueueEntry>> {
        Ok(self.inner.store.read_active()?.entries)
    }

    /// Entries that exhausted their retries.
    pub fn dead_letters(&self) -> QueueResult<Vec<QueueEntry>> {
        Ok(self.inner.store.read_dead()?.entries)
    }
}

impl Inner {
    fn admit(&self, events: Vec<TelemetryEvent>, error: &DeliveryError) -> Vec<EnqueueOutcome> {
        let config = &self.config;
        let now = Utc::now();
        let message = error.to_string();
        let entries: Vec<QueueEntry> = events
            .into_iter()
            .map(|event| QueueEntry {
                id: Uuid::new_v4().to_string(),
                event,
                queued_at: now,
                retry_count: 0,
                last_error: Some(message.clone()),
                next_retry_at: Some(backoff::next_retry_at(0, now, config)),
            })
            .collect();
        if entries.is_empty() {
            return Vec::new();
        }

        let admission = match self
            .store
            .append_active_many(&entries, config.max_queue_size)
        {
            Ok(admission) => admission,
            Err(e) => {
                warn!(error = %e, count = entries.len(), "Failed to persist events for retry");
                return vec![EnqueueOutcome::NotPersisted; entries.len()];
            }
        };

        if admission.accepted > 0 {
            {
                let mut stats = self.stats.lock();
                stats.queued_count = admission.size as u64;
                stats.last_error_at = Some(now);
            }
            self.persist_stats();
            if config.debug {
                debug!(
                    queued = admission.accepted,
                    queue_size = admission.size,
                    "Events queued for retry"
                );
            }
        }

        let dropped = entries.len() - admission.accepted;
        if dropped > 0 {
            warn!(dropped, queue_size = admission.size, "Retry queue full, dropping events");
            if let Some(cb) = &self.callbacks.on_queue_full {
                for _ in 0..dropped {
                    call_observer("on_queue_full", || cb(admission.size));
                }
            }
        }

        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                if index < admission.accepted {
                    EnqueueOutcome::Queued(entry.id)
                } else {
                    EnqueueOutcome::Dropped {
                        queue_size: admission.size,
                    }
                }
            })
            .collect()
    }

    /// Active entries due now, plus the total active count.
    fn load_ready(&self) -> QueueResult<(usize, Vec<QueueEntry>)> {
        self.settle_dead_lettered();
        let scan = self.store.read_active()?;
        let now = Utc::now();
        let total = scan.entries.len();
        let settled = self.dead_lettered.lock();
        let ready = scan
            .entries
            .into_iter()
            .filter(|entry| entry.is_ready(now) && !settled.contains(&entry.id))
            .collect();
        Ok((total, ready))
    }

    /// Drop active copies of entries already written to the dead-letter store.
    fn settle_dead_lettered(&self) {
        let pending = self.dead_lettered.lock().clone();
        if pending.is_empty() {
            return;
        }
        match self
            .store
            .update_active(|entries| entries.retain(|e| !pending.contains(&e.id)))
        {
            Ok(()) => {
                self.dead_lettered.lock().retain(|id| !pending.contains(id));
                debug!(count = pending.len(), "Removed dead-lettered entries from active store");
            }
            Err(e) => {
                warn!(error = %e, count = pending.len(), "Failed to remove dead-lettered entries");
            }
        }
    }

    /// Remove delivered entries and notify observers. Returns the count delivered.
    fn complete_batch(&self, chunk: &[QueueEntry]) -> usize {
        let ids: HashSet<&str> = chunk.iter().map(|e| e.id.as_str()).collect();
        if let Err(e) = self
            .store
            .update_active(|entries| entries.retain(|e| !ids.contains(e.id.as_str())))
        {
            // Entries stay on disk and are delivered again on a later pass.
            warn!(error = %e, count = chunk.len(), "Failed to remove delivered entries");
        }

        {
            let mut stats = self.stats.lock();
            stats.processed_count += chunk.len() as u64;
            stats.last_flush_at = Some(Utc::now());
        }

        if let Some(cb) = &self.callbacks.on_event_processed {
            for entry in chunk {
                call_observer("on_event_processed", || cb(&entry.event));
            }
        }

        if self.config.debug {
            debug!(count = chunk.len(), "Retry batch delivered");
        }
        chunk.len()
    }

    /// Record a failed re-attempt. Returns (rescheduled, dead-lettered) counts.
    fn fail_batch(&self, chunk: &[QueueEntry], error: &DeliveryError) -> (usize, usize) {
        let config = &self.config;
        let now = Utc::now();
        let message = error.to_string();

        let mut dead = Vec::new();
        let mut rescheduled = Vec::new();
        for entry in chunk {
            let mut entry = entry.clone();
            entry.retry_count = entry.retry_count.saturating_add(1);
            entry.last_error = Some(message.clone());
            if entry.retry_count >= config.max_retries {
                dead.push(entry);
            } else {
                entry.next_retry_at = Some(backoff::next_retry_at(entry.retry_count, now, config));
                rescheduled.push(entry);
            }
        }

        if let Err(e) = self.store.append_dead(&dead) {
            warn!(error = %e, count = dead.len(), "Failed to write dead-letter entries");
            // Keep them active so the dead-letter move is retried after the next failure.
            for mut entry in dead.drain(..) {
                entry.next_retry_at = Some(backoff::next_retry_at(entry.retry_count, now, config));
                rescheduled.push(entry);
            }
        }

        let dead_ids: HashSet<&str> = dead.iter().map(|e| e.id.as_str()).collect();
        let mut updates: HashMap<&str, &QueueEntry> =
            rescheduled.iter().map(|e| (e.id.as_str(), e)).collect();
        if let Err(e) = self.store.update_active(|entries| {
            entries.retain(|e| !dead_ids.contains(e.id.as_str()));
            for entry in entries.iter_mut() {
                if let Some(updated) = updates.remove(entry.id.as_str()) {
                    *entry = updated.clone();
                }
            }
        }) {
            warn!(error = %e, count = chunk.len(), "Failed to update retry schedule");
            // Already in the dead-letter store: never retry or move these again.
            self.dead_lettered
                .lock()
                .extend(dead.iter().map(|e| e.id.clone()));
        }

        {
            let mut stats = self.stats.lock();
            stats.last_error_at = Some(now);
            stats.dead_count += dead.len() as u64;
            stats.failed_count += dead.len() as u64;
        }

        for entry in &dead {
            warn!(
                entry_id = %entry.id,
                retry_count = entry.retry_count,
                error = %message,
                "Event moved to dead-letter store"
            );
            if let Some(cb) = &self.callbacks.on_event_failed {
                call_observer("on_event_failed", || cb(entry, error));
            }
        }

        if config.debug {
            debug!(
                rescheduled = rescheduled.len(),
                dead_lettered = dead.len(),
                error = %message,
                "Retry batch failed"
            );
        }
        (rescheduled.len(), dead.len())
    }

    fn refresh_stats(&self) -> QueueStats {
        match self.store.read_active() {
            Ok(scan) => {
                let now = Utc::now();
                let ready = scan.entries.iter().filter(|e| e.is_ready(now)).count();
                let mut stats = self.stats.lock();
                stats.queued_count = scan.entries.len() as u64;
                stats.ready_count = ready as u64;
                stats.corrupt_count = scan.corrupt as u64;
                stats.clone()
            }
            Err(e) => {
                warn!(error = %e, "Failed to scan retry queue");
                self.stats.lock().clone()
            }
        }
    }

    fn persist_stats(&self) {
        let stats = self.stats.lock();
        if let Err(e) = self.store.save_stats(&stats) {
            warn!(error = %e, "Failed to persist retry queue stats");
        }
    }

    fn log_debug_counts(&self, message: &'static str, stats: &QueueStats) {
        if self.config.debug {
            debug!(
                storage_dir = %self.config.storage_dir.display(),
                queued = stats.queued_count,
                dead = stats.dead_count,
                processed = stats.processed_count,
                "{}",
                message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BatchFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use telemetry_event_types::{Provider, TokenUsage};
    use tempfile::tempdir;

    fn event() -> TelemetryEvent {
        TelemetryEvent::success(
            Provider::OpenAi,
            "gpt-4",
            TokenUsage::new(100, 50),
            0.0045,
            std::time::Duration::from_millis(500),
        )
    }

    fn succeeding() -> SendBatchFn {
        Arc::new(|_events: Vec<TelemetryEvent>| -> BatchFuture { Box::pin(async { Ok(()) }) })
    }

    #[tokio::test]
    async fn enqueue_schedules_first_retry_one_base_delay_out() {
        let dir = tempdir().unwrap();
        let config = EventQueueConfig {
            retry_base_delay_ms: 1000,
            max_retry_delay_ms: 8000,
            ..EventQueueConfig::with_storage_dir(dir.path())
        };
        let queue = EventQueue::new(succeeding(), config, QueueCallbacks::new());

        let before = Utc::now();
        let outcome = queue.enqueue(event(), &DeliveryError::Network("refused".into()));
        assert!(outcome.is_queued());

        let entries = queue.entries().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.last_error.as_deref(), Some("Network error: refused"));
        let delta = entry.next_retry_at.unwrap() - entry.queued_at;
        assert_eq!(delta.num_milliseconds(), 1000);
        assert!(entry.queued_at >= before);
    }

    #[tokio::test]
    async fn concurrent_pass_is_skipped() {
        let dir = tempdir().unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));
        let calls = Arc::new(AtomicUsize::new(0));

        let send: SendBatchFn = {
            let calls = calls.clone();
            Arc::new(move |_events: Vec<TelemetryEvent>| -> BatchFuture {
                calls.fetch_add(1, Ordering::SeqCst);
                let rx = release_rx.lock().take();
                Box::pin(async move {
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok(())
                })
            })
        };

        let config = EventQueueConfig {
            retry_base_delay_ms: 0,
            ..EventQueueConfig::with_storage_dir(dir.path())
        };
        let queue = EventQueue::new(send, config, QueueCallbacks::new());
        queue.enqueue(event(), &DeliveryError::Network("down".into()));

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.process_queue().await }
        });
        while !queue.is_processing() {
            tokio::task::yield_now().await;
        }

        assert_eq!(queue.process_queue().await, ProcessOutcome::Skipped);

        release_tx.send(()).unwrap();
        let outcome = first.await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Completed(s) if s.delivered == 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!queue.is_processing());
    }

    #[tokio::test]
    async fn nothing_ready_before_retry_time() {
        let dir = tempdir().unwrap();
        let queue = EventQueue::new(
            succeeding(),
            EventQueueConfig::with_storage_dir(dir.path()),
            QueueCallbacks::new(),
        );
        queue.enqueue(event(), &DeliveryError::Network("down".into()));

        assert_eq!(queue.process_queue().await, ProcessOutcome::NothingReady);
        assert_eq!(queue.get_stats().queued_count, 1);
        assert_eq!(queue.get_stats().ready_count, 0);
    }

    #[tokio::test]
    async fn stop_processing_without_start_is_noop() {
        let dir = tempdir().unwrap();
        let queue = EventQueue::new(
            succeeding(),
            EventQueueConfig::with_storage_dir(dir.path()),
            QueueCallbacks::new(),
        );
        queue.stop_processing().await;
        queue.stop_processing().await;
        assert!(!queue.is_started());
        assert!(dir.path().join("queue-stats.json").exists());
    }

    #[tokio::test]
    async fn dead_lettered_entry_left_active_is_removed_not_moved_again() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let send: SendBatchFn = {
            let calls = calls.clone();
            Arc::new(move |_events: Vec<TelemetryEvent>| -> BatchFuture {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(DeliveryError::Network("down".into())) })
            })
        };
        let failed = Arc::new(AtomicUsize::new(0));
        let callbacks = QueueCallbacks::new().on_event_failed({
            let failed = failed.clone();
            move |_, _| {
                failed.fetch_add(1, Ordering::SeqCst);
            }
        });
        let config = EventQueueConfig {
            retry_base_delay_ms: 0,
            max_retries: 1,
            ..EventQueueConfig::with_storage_dir(dir.path())
        };
        let queue = EventQueue::new(send, config, callbacks);

        let EnqueueOutcome::Queued(id) =
            queue.enqueue(event(), &DeliveryError::Network("down".into()))
        else {
            panic!("event was not queued");
        };
        // Dead-letter write succeeded earlier but the active rewrite did not.
        queue.inner.dead_lettered.lock().insert(id);

        assert_eq!(queue.process_queue().await, ProcessOutcome::NothingReady);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(failed.load(Ordering::SeqCst), 0);
        assert!(queue.entries().unwrap().is_empty());
        assert!(queue.dead_letters().unwrap().is_empty());
        assert!(queue.inner.dead_lettered.lock().is_empty());
    }

    #[tokio::test]
    async fn enqueue_many_persists_with_one_append() {
        let dir = tempdir().unwrap();
        let full = Arc::new(AtomicUsize::new(0));
        let callbacks = QueueCallbacks::new().on_queue_full({
            let full = full.clone();
            move |size| {
                assert_eq!(size, 2);
                full.fetch_add(1, Ordering::SeqCst);
            }
        });
        let config = EventQueueConfig {
            max_queue_size: 2,
            ..EventQueueConfig::with_storage_dir(dir.path())
        };
        let queue = EventQueue::new(succeeding(), config, callbacks);

        let outcomes = queue
            .enqueue_many(vec![event(), event(), event()], &DeliveryError::Encode("x".into()))
            .await;
        assert!(outcomes[0].is_queued());
        assert!(outcomes[1].is_queued());
        assert_eq!(outcomes[2], EnqueueOutcome::Dropped { queue_size: 2 });
        assert_eq!(full.load(Ordering::SeqCst), 1);
        assert_eq!(queue.get_stats().queued_count, 2);

        assert!(queue
            .enqueue_many(Vec::new(), &DeliveryError::Encode("x".into()))
            .await
            .is_empty());
    }

    #[test]
    fn callbacks_debug_shows_presence() {
        let callbacks = QueueCallbacks::new().on_queue_full(|_| {});
        let rendered = format!("{:?}", callbacks);
        assert!(rendered.contains("on_queue_full: true"));
        assert!(rendered.contains("on_event_failed: false"));
    }
}
