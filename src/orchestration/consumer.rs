//! Single-flight queue worker loop shared by the dispatch and reconciliation engines.
//!
//! Each engine owns one [`ConsumerLoop`]. The loop pulls at most one message at a
//! time, so the engine never holds more than one unacknowledged delivery. Stopping
//! the loop drops whatever step is in progress; its message stays unacknowledged
//! and the broker redelivers it after the visibility timeout.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::messaging::{MessagingError, MessagingProvider, MessagingResult, QueuedMessage};

/// Counters for one engine
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub messages_received: AtomicU64,
    pub acked: AtomicU64,
    pub requeued: AtomicU64,
    pub deferred: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub published: AtomicU64,
    pub errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub messages_received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub deferred: u64,
    pub dead_lettered: u64,
    pub published: u64,
    pub errors: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Background loop state: running flag, shutdown signal and the spawned task
#[derive(Debug)]
pub struct ConsumerLoop {
    name: &'static str,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerLoop {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            handle: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the loop. `step` handles at most one message and returns whether it
    /// found one; an idle step sleeps for `poll_interval` before the next receive.
    /// Calling `start` on a running loop does nothing.
    pub fn start<F, Fut>(&self, poll_interval: Duration, mut step: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = MessagingResult<bool>> + Send + 'static,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!(consumer = self.name, "Consumer already running");
            return;
        }

        let name = self.name;
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);

        let handle = tokio::spawn(async move {
            info!(consumer = name, poll_interval_ms = poll_interval.as_millis() as u64, "Consumer loop started");

            while running.load(Ordering::Acquire) {
                let idle = tokio::select! {
                    _ = shutdown.notified() => break,
                    result = step() => match result {
                        Ok(handled) => !handled,
                        Err(e) => {
                            error!(consumer = name, error = %e, "Consumer step failed");
                            true
                        }
                    },
                };

                if idle {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }

            info!(consumer = name, "Consumer loop stopped");
        });

        *self.handle.lock() = Some(handle);
    }

    /// Signal the loop to exit and wait for it
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(consumer = self.name, error = %e, "Consumer task ended abnormally");
                }
            }
        }
    }
}

/// How long a malformed payload's local count survives without being seen again
pub const MALFORMED_TRACKING_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy)]
struct LocalAttempts {
    count: u32,
    last_seen: Instant,
}

/// Bounded redelivery for payloads that can never be parsed.
///
/// The broker's receive count is preferred; RabbitMQ only reports a redelivered
/// flag, so a process-local count keyed by payload hash backs it up. Counts for
/// payloads not seen within the retention period are pruned, which covers
/// payloads dead-lettered or deleted by another worker.
#[derive(Debug)]
pub struct MalformedPolicy {
    max_redeliveries: u32,
    retention: Duration,
    local_attempts: DashMap<u64, LocalAttempts>,
}

impl MalformedPolicy {
    pub fn new(max_redeliveries: u32) -> Self {
        Self {
            max_redeliveries,
            retention: MALFORMED_TRACKING_RETENTION,
            local_attempts: DashMap::new(),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Payloads with a live local redelivery count
    pub fn tracked_payloads(&self) -> usize {
        self.local_attempts.len()
    }

    fn record_attempt(&self, key: u64) -> u32 {
        let now = Instant::now();
        let retention = self.retention;
        self.local_attempts
            .retain(|_, seen| now.duration_since(seen.last_seen) <= retention);

        let mut entry = self.local_attempts.entry(key).or_insert(LocalAttempts {
            count: 0,
            last_seen: now,
        });
        entry.count += 1;
        entry.last_seen = now;
        entry.count
    }

    /// Requeue the message, or dead-letter it once it has been redelivered too often.
    /// Returns `true` when the message was dead-lettered.
    pub async fn settle(
        &self,
        provider: &MessagingProvider,
        queue_name: &str,
        message: &QueuedMessage,
        stats: &ConsumerStats,
        cause: &MessagingError,
    ) -> MessagingResult<bool> {
        let key = payload_key(&message.message);
        let attempts = self.record_attempt(key);
        let deliveries = message.receive_count.max(attempts);

        if deliveries > self.max_redeliveries {
            warn!(
                queue = %queue_name,
                receipt_handle = %message.receipt_handle,
                deliveries,
                error = %cause,
                "Malformed message exceeded redelivery limit, dead-lettering"
            );
            provider
                .nack_message(queue_name, &message.receipt_handle, false)
                .await?;
            self.local_attempts.remove(&key);
            ConsumerStats::incr(&stats.dead_lettered);
            return Ok(true);
        }

        warn!(
            queue = %queue_name,
            receipt_handle = %message.receipt_handle,
            deliveries,
            error = %cause,
            "Malformed message, requeueing"
        );
        provider
            .nack_message(queue_name, &message.receipt_handle, true)
            .await?;
        ConsumerStats::incr(&stats.requeued);
        Ok(false)
    }
}

fn payload_key(payload: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}
