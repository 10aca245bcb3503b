/// Durable outbox for accepted votes.
///
/// Votes are applied optimistically on the client and queued here; a flush
/// pushes every queued vote to the gateway concurrently, then decides each
/// vote's fate on its own:
///
///   Queued -> Applying -> Applied (removed)
///                      -> Failed  -> Queued again while attempts < max_retries
///                                 -> DroppedPermanently otherwise
///
/// Permanent gateway errors (`NotFound`, `Conflict`, `Rejected`) skip the
/// retry budget and drop at once. The buffer is bounded: on overflow the
/// oldest votes are dropped first, favouring recent votes. Every drop is
/// logged and counted in [`QueueStats`].
///
/// The buffer is written to the local store after every change, so queued
/// votes survive a restart.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_CAPACITY, DEFAULT_REMOTE_TIMEOUT_MS, DEFAULT_SYNC_INTERVAL_MS,
};
use crate::error::{GatewayError, StoreError};
use crate::gateway::{PersistenceGateway, VoteTransaction};
use crate::store::{LocalStore, load_json, save_json};
use crate::types::{Timestamp, VoteId};

pub const QUEUE_KEY: &str = "hotsmash_vote_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub max_retries: u32,
    pub sync_interval_ms: u64,
    pub remote_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: DEFAULT_QUEUE_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
        }
    }
}

/// One vote waiting to be applied remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
    pub id: String,
    pub payload: VoteTransaction,
    pub enqueued_at: Timestamp,
    #[serde(default)]
    pub attempt_count: u32,
}

impl QueuedMutation {
    pub fn new(payload: VoteTransaction, enqueued_at: Timestamp) -> Self {
        QueuedMutation {
            id: payload.mutation_id.clone(),
            payload,
            enqueued_at,
            attempt_count: 0,
        }
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Failed votes that were dropped for good during this flush.
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub is_flushing: bool,
    pub oldest_age_ms: Option<u64>,
    pub applied_total: u64,
    pub failed_attempts_total: u64,
    pub dropped_overflow: u64,
    pub dropped_exhausted: u64,
    pub dropped_permanent: u64,
}

/// Host application transitions that trigger a best-effort flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Hidden or backgrounded.
    Hidden,
    /// Regained focus.
    Focused,
    /// About to exit. The flush may not finish first; whatever remains stays
    /// in the store for next time.
    Terminating,
}

#[derive(Debug, Default)]
struct QueueCounters {
    applied: AtomicU64,
    failed_attempts: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_exhausted: AtomicU64,
    dropped_permanent: AtomicU64,
}

/// Clears the flushing flag even if the flush future is dropped midway.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct DurableVoteQueue {
    config: QueueConfig,
    gateway: Arc<dyn PersistenceGateway>,
    store: Arc<dyn LocalStore>,
    buffer: Mutex<VecDeque<QueuedMutation>>,
    flushing: AtomicBool,
    counters: QueueCounters,
}

impl DurableVoteQueue {
    /// Create a queue, restoring any outbox left in `store`.
    ///
    /// An unreadable outbox blob is logged and discarded; store I/O errors
    /// are returned.
    pub fn new(
        config: QueueConfig,
        gateway: Arc<dyn PersistenceGateway>,
        store: Arc<dyn LocalStore>,
    ) -> Result<Self, StoreError> {
        let restored = match load_json::<Vec<QueuedMutation>>(store.as_ref(), QUEUE_KEY) {
            Ok(restored) => restored.unwrap_or_default(),
            Err(StoreError::Encode(e)) => {
                warn!(error = %e, "discarding unreadable vote queue");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let queue = DurableVoteQueue {
            config,
            gateway,
            store,
            buffer: Mutex::new(VecDeque::new()),
            flushing: AtomicBool::new(false),
            counters: QueueCounters::default(),
        };

        if !restored.is_empty() {
            info!(pending = restored.len(), "restored queued votes");
            let mut buffer = queue.lock_buffer();
            buffer.extend(restored);
            queue.enforce_capacity(&mut buffer);
            queue.persist(&buffer);
        }
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append a vote. Never blocks on the network.
    pub fn enqueue(&self, mutation: QueuedMutation) {
        let mut buffer = self.lock_buffer();
        debug!(
            mutation_id = %mutation.id,
            winner = %mutation.payload.winner_id,
            loser = %mutation.payload.loser_id,
            "vote queued"
        );
        buffer.push_back(mutation);
        self.enforce_capacity(&mut buffer);
        self.persist(&buffer);
    }

    pub fn len(&self) -> usize {
        self.lock_buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_pending(&self) -> bool {
        !self.is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// Snapshot of the queued votes, oldest first.
    pub fn pending(&self) -> Vec<QueuedMutation> {
        self.lock_buffer().iter().cloned().collect()
    }

    /// Drop every queued vote without sending it.
    pub fn clear(&self) {
        let mut buffer = self.lock_buffer();
        let cleared = buffer.len();
        buffer.clear();
        self.persist(&buffer);
        info!(cleared, "vote queue cleared");
    }

    pub fn stats(&self, now: Timestamp) -> QueueStats {
        let buffer = self.lock_buffer();
        QueueStats {
            pending: buffer.len(),
            is_flushing: self.is_flushing(),
            oldest_age_ms: buffer.iter().map(|m| m.enqueued_at).min().map(|t| now.saturating_sub(t)),
            applied_total: self.counters.applied.load(Ordering::Relaxed),
            failed_attempts_total: self.counters.failed_attempts.load(Ordering::Relaxed),
            dropped_overflow: self.counters.dropped_overflow.load(Ordering::Relaxed),
            dropped_exhausted: self.counters.dropped_exhausted.load(Ordering::Relaxed),
            dropped_permanent: self.counters.dropped_permanent.load(Ordering::Relaxed),
        }
    }

    /// Try to apply every queued vote.
    ///
    /// Non-reentrant: while a flush is running, further calls return an empty
    /// report straight away. Votes enqueued during a flush are kept for the
    /// next one.
    pub async fn flush(&self) -> FlushReport {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("flush already in progress, ignoring trigger");
            return FlushReport::default();
        }
        let _guard = FlushGuard(&self.flushing);

        let snapshot = self.pending();
        if snapshot.is_empty() {
            return FlushReport::default();
        }
        debug!(count = snapshot.len(), "flushing queued votes");

        let timeout = Duration::from_millis(self.config.remote_timeout_ms);
        let outcomes = join_all(snapshot.iter().map(|m| self.apply_one(&m.payload, timeout))).await;

        let mut report = FlushReport::default();
        let mut buffer = self.lock_buffer();
        for (mutation, outcome) in snapshot.iter().zip(outcomes) {
            let position = buffer.iter().position(|m| m.id == mutation.id);
            match outcome {
                Ok(vote_id) => {
                    report.succeeded += 1;
                    self.counters.applied.fetch_add(1, Ordering::Relaxed);
                    debug!(mutation_id = %mutation.id, vote_id = %vote_id, "vote applied");
                    if let Some(i) = position {
                        buffer.remove(i);
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    // Evicted by overflow while in flight: already counted as dropped.
                    let Some(i) = position else { continue };
                    let attempts = mutation.attempt_count + 1;

                    if !err.is_retryable() {
                        buffer.remove(i);
                        report.dropped += 1;
                        self.counters.dropped_permanent.fetch_add(1, Ordering::Relaxed);
                        warn!(mutation_id = %mutation.id, attempts, error = %err, "dropping vote after permanent failure");
                    } else if attempts >= self.config.max_retries {
                        buffer.remove(i);
                        report.dropped += 1;
                        self.counters.dropped_exhausted.fetch_add(1, Ordering::Relaxed);
                        warn!(mutation_id = %mutation.id, attempts, error = %err, "dropping vote after exhausting retries");
                    } else {
                        buffer[i].attempt_count = attempts;
                        debug!(mutation_id = %mutation.id, attempts, error = %err, "vote apply failed, will retry");
                    }
                }
            }
        }
        self.persist(&buffer);
        drop(buffer);

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            dropped = report.dropped,
            "vote queue flush complete"
        );
        report
    }

    /// Flush in response to a host lifecycle transition, if anything is queued.
    pub async fn on_lifecycle(&self, event: LifecycleEvent) -> FlushReport {
        if !self.has_pending() {
            return FlushReport::default();
        }
        debug!(?event, "lifecycle flush");
        self.flush().await
    }

    /// Flush every `sync_interval_ms` in the background until the returned
    /// handle is stopped. Ticks that land while a flush is running are skipped.
    pub fn spawn_periodic_sync(self: &Arc<Self>) -> SyncHandle {
        let queue = Arc::clone(self);
        let period = Duration::from_millis(self.config.sync_interval_ms.max(1));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if queue.has_pending() && !queue.is_flushing() {
                            queue.flush().await;
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("periodic vote sync stopped");
        });

        SyncHandle { stop: stop_tx, task }
    }

    async fn apply_one(&self, tx: &VoteTransaction, timeout: Duration) -> Result<VoteId, GatewayError> {
        match tokio::time::timeout(timeout, self.gateway.apply_vote_transaction(tx)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Unavailable(format!(
                "timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn enforce_capacity(&self, buffer: &mut VecDeque<QueuedMutation>) {
        while buffer.len() > self.config.capacity {
            if let Some(evicted) = buffer.pop_front() {
                self.counters.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                warn!(
                    mutation_id = %evicted.id,
                    capacity = self.config.capacity,
                    "vote queue full, dropping oldest vote"
                );
            }
        }
    }

    fn persist(&self, buffer: &VecDeque<QueuedMutation>) {
        if let Err(e) = save_json(self.store.as_ref(), QUEUE_KEY, buffer) {
            error!(error = %e, pending = buffer.len(), "failed to persist vote queue");
        }
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<QueuedMutation>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the background sync task.
pub struct SyncHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the task and wait for it to exit. A flush already underway
    /// finishes first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "periodic vote sync task failed");
        }
    }
}
