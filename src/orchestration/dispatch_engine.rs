//! # Dispatch Engine
//!
//! Consumes the open-ride queue one message at a time:
//!
//! 1. decode the ride (malformed payloads go through [`MalformedPolicy`])
//! 2. ask the geo matcher for nearby drivers
//! 3. fan the offer out to every candidate
//! 4. on at least one delivered offer, stamp `offered_at`, publish to the
//!    pending-offer queue and ack the open-ride message
//!
//! Every failure along the way requeues the open-ride message. Offers are not
//! retried within a cycle; a later cycle re-sends them, so drivers may see the
//! same ride more than once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use super::consumer::{ConsumerLoop, ConsumerStats, ConsumerStatsSnapshot, MalformedPolicy};
use super::types::DispatchOutcome;
use crate::config::DispatchConfig;
use crate::logging::log_ride_transition;
use crate::messaging::{MessagingProvider, MessagingResult, QueuedMessage};
use crate::models::{Candidate, Ride, RideStatus};
use crate::services::{with_deadline, DriverOfferClient, GeoMatcher};

#[derive(Debug, Clone)]
struct DispatchSettings {
    open_ride_queue: String,
    pending_offer_queue: String,
    search_radius_km: f64,
    no_candidate_backoff: Duration,
    max_offer_candidates: usize,
    rpc_timeout: Duration,
    visibility_timeout: Duration,
    poll_interval: Duration,
    defer_via_redelivery: bool,
}

impl DispatchSettings {
    fn from_config(config: &DispatchConfig) -> Self {
        Self {
            open_ride_queue: config.queues.open_ride_queue.clone(),
            pending_offer_queue: config.queues.pending_offer_queue.clone(),
            search_radius_km: config.dispatch.search_radius_km,
            no_candidate_backoff: config.dispatch.no_candidate_backoff(),
            max_offer_candidates: config.dispatch.max_offer_candidates,
            rpc_timeout: config.services.rpc_timeout(),
            visibility_timeout: config.queues.visibility_timeout(),
            poll_interval: config.queues.poll_interval(),
            defer_via_redelivery: config.queues.defer_via_redelivery,
        }
    }
}

pub struct DispatchEngine {
    provider: Arc<MessagingProvider>,
    geo: Arc<dyn GeoMatcher>,
    offers: Arc<dyn DriverOfferClient>,
    settings: DispatchSettings,
    malformed: MalformedPolicy,
    stats: ConsumerStats,
    consumer: ConsumerLoop,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("provider", &self.provider.provider_name())
            .field("settings", &self.settings)
            .field("is_running", &self.consumer.is_running())
            .finish()
    }
}

impl DispatchEngine {
    pub fn new(
        provider: Arc<MessagingProvider>,
        geo: Arc<dyn GeoMatcher>,
        offers: Arc<dyn DriverOfferClient>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            provider,
            geo,
            offers,
            settings: DispatchSettings::from_config(config),
            malformed: MalformedPolicy::new(config.queues.max_malformed_redeliveries),
            stats: ConsumerStats::default(),
            consumer: ConsumerLoop::new("dispatch_engine"),
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

    /// Receive and fully settle at most one open-ride message
    pub async fn process_next(&self) -> MessagingResult<DispatchOutcome> {
        let mut messages = self
            .provider
            .receive_messages(&self.settings.open_ride_queue, 1, self.settings.visibility_timeout)
            .await?;

        let Some(message) = messages.pop() else {
            return Ok(DispatchOutcome::Idle);
        };
        ConsumerStats::incr(&self.stats.messages_received);

        let ride = match message.decode::<Ride>() {
            Ok(ride) => ride,
            Err(e) => {
                let dead_lettered = self
                    .malformed
                    .settle(
                        &self.provider,
                        &self.settings.open_ride_queue,
                        &message,
                        &self.stats,
                        &e,
                    )
                    .await?;
                return Ok(DispatchOutcome::Malformed { dead_lettered });
            }
        };

        self.dispatch_ride(&message, ride).await
    }

    #[instrument(skip(self, message, ride), fields(ride_id = ride.id, receipt_handle = %message.receipt_handle))]
    async fn dispatch_ride(
        &self,
        message: &QueuedMessage,
        mut ride: Ride,
    ) -> MessagingResult<DispatchOutcome> {
        let ride_id = ride.id;

        let candidates = match with_deadline(
            "geo",
            self.settings.rpc_timeout,
            self.geo.nearest(ride.coordinate(), self.settings.search_radius_km),
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Geo query failed, requeueing ride");
                self.requeue(message).await?;
                return Ok(DispatchOutcome::GeoFailed { ride_id });
            }
        };

        if candidates.is_empty() {
            let deferred = self.back_off(message).await?;
            return Ok(DispatchOutcome::NoCandidates {
                ride_id,
                backoff: self.settings.no_candidate_backoff,
                deferred,
            });
        }

        let (offers_sent, offers_failed) = self.send_offers(ride_id, &candidates).await;
        if offers_sent == 0 {
            warn!(attempted = offers_failed, "Every offer failed, requeueing ride");
            self.requeue(message).await?;
            return Ok(DispatchOutcome::AllOffersFailed {
                ride_id,
                attempted: offers_failed,
            });
        }

        ride.mark_offered(Utc::now());
        if let Err(e) = self
            .provider
            .send_message(&self.settings.pending_offer_queue, &ride)
            .await
        {
            warn!(error = %e, "Publishing pending offer failed, requeueing ride");
            self.requeue(message).await?;
            return Ok(DispatchOutcome::PublishFailed { ride_id });
        }
        ConsumerStats::incr(&self.stats.published);

        self.provider
            .ack_message(&self.settings.open_ride_queue, &message.receipt_handle)
            .await?;
        ConsumerStats::incr(&self.stats.acked);

        log_ride_transition(
            ride_id,
            RideStatus::Open,
            RideStatus::Offered,
            &format!("offered to {offers_sent} of {} drivers", offers_sent + offers_failed),
        );

        Ok(DispatchOutcome::Offered {
            ride_id,
            offers_sent,
            offers_failed,
        })
    }

    /// Offer the ride to the closest candidates concurrently. Returns (sent, failed).
    async fn send_offers(&self, ride_id: i64, candidates: &[Candidate]) -> (usize, usize) {
        let limit = candidates.len().min(self.settings.max_offer_candidates);
        if limit < candidates.len() {
            debug!(
                ride_id,
                candidates = candidates.len(),
                limit,
                "Truncating candidate list"
            );
        }

        let offers = candidates[..limit].iter().map(|candidate| async move {
            let result = with_deadline(
                "offer",
                self.settings.rpc_timeout,
                self.offers.offer(
                    candidate.driver_id,
                    ride_id,
                    candidate.distance,
                    candidate.coordinate,
                ),
            )
            .await;
            if let Err(e) = &result {
                warn!(ride_id, driver_id = candidate.driver_id, error = %e, "Offer failed");
            }
            result.is_ok()
        });

        let results = join_all(offers).await;
        let sent = results.iter().filter(|ok| **ok).count();
        (sent, results.len() - sent)
    }

    /// Returns whether the redelivery was scheduled on the broker
    async fn back_off(&self, message: &QueuedMessage) -> MessagingResult<bool> {
        let backoff = self.settings.no_candidate_backoff;

        if self.settings.defer_via_redelivery && self.provider.supports_delayed_redelivery() {
            info!(backoff_ms = backoff.as_millis() as u64, "No drivers nearby, deferring redelivery");
            self.provider
                .nack_with_delay(&self.settings.open_ride_queue, &message.receipt_handle, backoff)
                .await?;
            ConsumerStats::incr(&self.stats.deferred);
            return Ok(true);
        }

        info!(backoff_ms = backoff.as_millis() as u64, "No drivers nearby, backing off");
        tokio::time::sleep(backoff).await;
        self.requeue(message).await?;
        Ok(false)
    }

    async fn requeue(&self, message: &QueuedMessage) -> MessagingResult<()> {
        self.provider
            .nack_message(&self.settings.open_ride_queue, &message.receipt_handle, true)
            .await?;
        ConsumerStats::incr(&self.stats.requeued);
        Ok(())
    }
}
