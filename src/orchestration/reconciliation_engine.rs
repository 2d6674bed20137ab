//! # Reconciliation Engine
//!
//! Consumes the pending-offer queue. Each ride is examined no earlier than one
//! acceptance window after `offered_at`; by then it either has a task (finalized)
//! or goes back to the open-ride queue for another dispatch cycle. Rides older
//! than the staleness ceiling are dropped.
//!
//! While the window is still open the message is redelivered later by the broker
//! when the provider can schedule that, otherwise the worker sleeps it out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use super::consumer::{ConsumerLoop, ConsumerStats, ConsumerStatsSnapshot, MalformedPolicy};
use super::types::ReconciliationOutcome;
use crate::config::DispatchConfig;
use crate::logging::log_ride_transition;
use crate::messaging::{MessagingProvider, MessagingResult, QueuedMessage};
use crate::models::{Ride, RideStatus};
use crate::registry::{with_store_deadline, DriverRegistry};

#[derive(Debug, Clone)]
struct ReconciliationSettings {
    open_ride_queue: String,
    pending_offer_queue: String,
    acceptance_window: Duration,
    staleness_ceiling: Duration,
    rpc_timeout: Duration,
    visibility_timeout: Duration,
    poll_interval: Duration,
    defer_via_redelivery: bool,
}

impl ReconciliationSettings {
    fn from_config(config: &DispatchConfig) -> Self {
        Self {
            open_ride_queue: config.queues.open_ride_queue.clone(),
            pending_offer_queue: config.queues.pending_offer_queue.clone(),
            acceptance_window: config.reconciliation.acceptance_window(),
            staleness_ceiling: config.reconciliation.staleness_ceiling(),
            rpc_timeout: config.services.rpc_timeout(),
            visibility_timeout: config.queues.visibility_timeout(),
            poll_interval: config.queues.poll_interval(),
            defer_via_redelivery: config.queues.defer_via_redelivery,
        }
    }
}

pub struct ReconciliationEngine {
    provider: Arc<MessagingProvider>,
    registry: Arc<dyn DriverRegistry>,
    settings: ReconciliationSettings,
    malformed: MalformedPolicy,
    /// Offer cycles already sent back to open-ride, keyed by (ride id, offered_at)
    republished: DashMap<(i64, DateTime<Utc>), ()>,
    stats: ConsumerStats,
    consumer: ConsumerLoop,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("provider", &self.provider.provider_name())
            .field("registry", &self.registry.backend_name())
            .field("settings", &self.settings)
            .field("is_running", &self.consumer.is_running())
            .finish()
    }
}

impl ReconciliationEngine {
    pub fn new(
        provider: Arc<MessagingProvider>,
        registry: Arc<dyn DriverRegistry>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            settings: ReconciliationSettings::from_config(config),
            malformed: MalformedPolicy::new(config.queues.max_malformed_redeliveries),
            republished: DashMap::new(),
            stats: ConsumerStats::default(),
            consumer: ConsumerLoop::new("reconciliation_engine"),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        self.consumer.start(self.settings.poll_interval, move || {
            let engine = Arc::clone(&engine);
            async move {
                let outcome = engine.process_next().await.inspect_err(|_| {
                    ConsumerStats::incr(&engine.stats.errors);
                })?;
                Ok(!outcome.is_idle())
            }
        });
    }

    pub async fn stop(&self) {
        self.consumer.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.consumer.is_running()
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Receive and fully settle at most one pending-offer message
    pub async fn process_next(&self) -> MessagingResult<ReconciliationOutcome> {
        let mut messages = self
            .provider
            .receive_messages(
                &self.settings.pending_offer_queue,
                1,
                self.settings.visibility_timeout,
            )
            .await?;

        let Some(message) = messages.pop() else {
            return Ok(ReconciliationOutcome::Idle);
        };
        ConsumerStats::incr(&self.stats.messages_received);

        let ride = match message.decode::<Ride>() {
            Ok(ride) => ride,
            Err(e) => {
                let dead_lettered = self
                    .malformed
                    .settle(
                        &self.provider,
                        &self.settings.pending_offer_queue,
                        &message,
                        &self.stats,
                        &e,
                    )
                    .await?;
                return Ok(ReconciliationOutcome::Malformed { dead_lettered });
            }
        };

        self.reconcile(&message, &ride).await
    }

    #[instrument(skip(self, message, ride), fields(ride_id = ride.id, receipt_handle = %message.receipt_handle))]
    async fn reconcile(
        &self,
        message: &QueuedMessage,
        ride: &Ride,
    ) -> MessagingResult<ReconciliationOutcome> {
        let ride_id = ride.id;
        let now = Utc::now();

        let Some(offered_at) = ride.offered_at else {
            warn!("Pending offer carries no offered_at, dropping as stale");
            return self.drop_stale(message, ride_id).await;
        };

        // Measured once; the window wait below does not re-check staleness.
        // A stamp from the future (clock skew) counts as just offered.
        let elapsed = (now - offered_at).to_std().unwrap_or(Duration::ZERO);

        if elapsed < self.settings.acceptance_window {
            let remaining = self.settings.acceptance_window - elapsed;

            if self.settings.defer_via_redelivery && self.provider.supports_delayed_redelivery() {
                debug!(remaining_ms = remaining.as_millis() as u64, "Acceptance window open, deferring");
                self.provider
                    .nack_with_delay(
                        &self.settings.pending_offer_queue,
                        &message.receipt_handle,
                        remaining,
                    )
                    .await?;
                ConsumerStats::incr(&self.stats.deferred);
                return Ok(ReconciliationOutcome::Deferred { ride_id, remaining });
            }

            debug!(remaining_ms = remaining.as_millis() as u64, "Acceptance window open, waiting");
            tokio::time::sleep(remaining).await;
        }

        if elapsed > self.settings.staleness_ceiling {
            info!(elapsed_secs = elapsed.as_secs(), "Ride exceeded staleness ceiling");
            return self.drop_stale(message, ride_id).await;
        }

        let lookup = with_store_deadline(
            "task lookup",
            self.settings.rpc_timeout,
            self.registry.get_task_by_ride(ride_id),
        )
        .await;

        match lookup {
            Ok(Some(task)) => {
                self.ack(message).await?;
                log_ride_transition(
                    ride_id,
                    RideStatus::Offered,
                    RideStatus::Assigned,
                    &format!("accepted by driver {}", task.driver_id),
                );
                Ok(ReconciliationOutcome::Assigned {
                    ride_id,
                    driver_id: task.driver_id,
                })
            }
            Ok(None) => self.reopen(message, ride_id, offered_at).await,
            Err(e) => {
                warn!(error = %e, "Task lookup failed, requeueing pending offer");
                self.provider
                    .nack_message(
                        &self.settings.pending_offer_queue,
                        &message.receipt_handle,
                        true,
                    )
                    .await?;
                ConsumerStats::incr(&self.stats.requeued);
                Ok(ReconciliationOutcome::LookupFailed { ride_id })
            }
        }
    }

    async fn reopen(
        &self,
        message: &QueuedMessage,
        ride_id: i64,
        offered_at: DateTime<Utc>,
    ) -> MessagingResult<ReconciliationOutcome> {
        let key = (ride_id, offered_at);

        if self.republished.contains_key(&key) {
            debug!("Offer cycle already republished, acknowledging redelivery");
            self.ack(message).await?;
            return Ok(ReconciliationOutcome::Reopened {
                ride_id,
                duplicate: true,
            });
        }

        // The original payload goes back unchanged; dispatch re-stamps offered_at
        if let Err(e) = self
            .provider
            .send_raw(&self.settings.open_ride_queue, &message.message)
            .await
        {
            warn!(error = %e, "Republishing to open-ride failed, requeueing pending offer");
            self.provider
                .nack_message(
                    &self.settings.pending_offer_queue,
                    &message.receipt_handle,
                    true,
                )
                .await?;
            ConsumerStats::incr(&self.stats.requeued);
            return Ok(ReconciliationOutcome::RepublishFailed { ride_id });
        }
        ConsumerStats::incr(&self.stats.published);
        self.remember_republished(key);

        self.ack(message).await?;
        log_ride_transition(
            ride_id,
            RideStatus::Offered,
            RideStatus::Reopened,
            "no driver accepted within the window",
        );

        Ok(ReconciliationOutcome::Reopened {
            ride_id,
            duplicate: false,
        })
    }

    /// Entries older than the staleness ceiling can never match again
    fn remember_republished(&self, key: (i64, DateTime<Utc>)) {
        self.republished.insert(key, ());

        let cutoff = chrono::Duration::from_std(self.settings.staleness_ceiling)
            .ok()
            .and_then(|ceiling| Utc::now().checked_sub_signed(ceiling));
        if let Some(cutoff) = cutoff {
            self.republished
                .retain(|(_, offered_at), _| *offered_at >= cutoff);
        }
    }

    async fn drop_stale(
        &self,
        message: &QueuedMessage,
        ride_id: i64,
    ) -> MessagingResult<ReconciliationOutcome> {
        self.ack(message).await?;
        log_ride_transition(
            ride_id,
            RideStatus::Offered,
            RideStatus::StaleDropped,
            "abandoned without assignment",
        );
        Ok(ReconciliationOutcome::StaleDropped { ride_id })
    }

    async fn ack(&self, message: &QueuedMessage) -> MessagingResult<()> {
        self.provider
            .ack_message(&self.settings.pending_offer_queue, &message.receipt_handle)
            .await?;
        ConsumerStats::incr(&self.stats.acked);
        Ok(())
    }
}
