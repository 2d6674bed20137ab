//! Shared fakes and builders for the integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use ride_dispatch::config::DispatchConfig;
use ride_dispatch::messaging::service::InMemoryMessagingService;
use ride_dispatch::messaging::MessagingProvider;
use ride_dispatch::models::{Candidate, Coordinate, Ride};
use ride_dispatch::orchestration::{
    AcceptanceGuard, DispatchEngine, ReconciliationEngine, RidePublisher,
};
use ride_dispatch::registry::InMemoryDriverRegistry;
use ride_dispatch::services::{
    DriverOfferClient, GeoMatcher, OfferConfirmation, ServiceError, ServiceResult,
};

/// Protocol timings shrunk so tests finish quickly
pub fn test_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.dispatch.no_candidate_backoff_ms = 100;
    config.dispatch.search_radius_km = 2.5;
    config.reconciliation.acceptance_window_ms = 200;
    config.reconciliation.staleness_ceiling_seconds = 3600;
    config.services.rpc_timeout_ms = 300;
    config.queues.poll_interval_ms = 10;
    config.queues.max_malformed_redeliveries = 2;
    config
}

pub fn ride(id: i64, lat: f64, lon: f64) -> Ride {
    let now = Utc::now();
    Ride {
        id,
        uuid: Uuid::new_v4(),
        passenger_id: format!("passenger-{id}"),
        driver_id: None,
        lat,
        lon,
        address: "Mangilik El 55".to_string(),
        created_at: now,
        updated_at: now,
        offered_at: None,
    }
}

pub fn offered_ride(id: i64, offered_at: DateTime<Utc>) -> Ride {
    let mut ride = ride(id, 51.1, 71.4);
    ride.offered_at = Some(offered_at);
    ride
}

pub fn candidate(driver_id: i64, distance: f64) -> Candidate {
    Candidate {
        driver_id,
        distance,
        coordinate: Coordinate::new(51.1 + distance / 100.0, 71.4),
    }
}

/// Geo matcher answering from a script, falling back to a fixed answer
#[derive(Debug, Default)]
pub struct FakeGeoMatcher {
    scripted: Mutex<VecDeque<ServiceResult<Vec<Candidate>>>>,
    fallback: Mutex<Vec<Candidate>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(Coordinate, f64)>>,
}

impl FakeGeoMatcher {
    pub fn returning(candidates: Vec<Candidate>) -> Self {
        let fake = Self::default();
        *fake.fallback.lock() = candidates;
        fake
    }

    pub fn push_response(&self, response: ServiceResult<Vec<Candidate>>) {
        self.scripted.lock().push_back(response);
    }

    pub fn set_fallback(&self, candidates: Vec<Candidate>) {
        *self.fallback.lock() = candidates;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(Coordinate, f64)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GeoMatcher for FakeGeoMatcher {
    async fn nearest(&self, coordinate: Coordinate, radius_km: f64) -> ServiceResult<Vec<Candidate>> {
        self.calls.lock().push((coordinate, radius_km));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.scripted.lock().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(self.fallback.lock().clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfferCall {
    pub driver_id: i64,
    pub ride_id: i64,
    pub distance: f64,
    pub coordinate: Coordinate,
}

/// Offer client that fails for chosen drivers and records every call
#[derive(Debug, Default)]
pub struct FakeOfferClient {
    failing_drivers: Mutex<HashSet<i64>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<OfferCall>>,
}

impl FakeOfferClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, driver_id: i64) {
        self.failing_drivers.lock().insert(driver_id);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<OfferCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for_ride(&self, ride_id: i64) -> usize {
        self.calls.lock().iter().filter(|c| c.ride_id == ride_id).count()
    }
}

#[async_trait]
impl DriverOfferClient for FakeOfferClient {
    async fn offer(
        &self,
        driver_id: i64,
        ride_id: i64,
        distance: f64,
        coordinate: Coordinate,
    ) -> ServiceResult<OfferConfirmation> {
        self.calls.lock().push(OfferCall {
            driver_id,
            ride_id,
            distance,
            coordinate,
        });
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_drivers.lock().contains(&driver_id) {
            return Err(ServiceError::status("offer", 503, "driver app unreachable"));
        }
        Ok(OfferConfirmation {
            message: format!("offer sent to driver {driver_id}"),
        })
    }
}

/// Everything wired against in-memory backends
pub struct Harness {
    pub config: DispatchConfig,
    pub provider: Arc<MessagingProvider>,
    pub registry: Arc<InMemoryDriverRegistry>,
    pub geo: Arc<FakeGeoMatcher>,
    pub offers: Arc<FakeOfferClient>,
    pub dispatch: Arc<DispatchEngine>,
    pub reconciliation: Arc<ReconciliationEngine>,
    pub guard: Arc<AcceptanceGuard>,
    pub publisher: RidePublisher,
}

impl Harness {
    pub async fn new(config: DispatchConfig) -> Self {
        Self::with_geo(config, FakeGeoMatcher::default()).await
    }

    pub async fn with_geo(config: DispatchConfig, geo: FakeGeoMatcher) -> Self {
        let provider = Arc::new(MessagingProvider::new_in_memory());
        provider
            .ensure_queues(&config.queues.queue_names())
            .await
            .unwrap();

        let registry = Arc::new(InMemoryDriverRegistry::new());
        let geo = Arc::new(geo);
        let offers = Arc::new(FakeOfferClient::new());

        let dispatch = Arc::new(DispatchEngine::new(
            Arc::clone(&provider),
            geo.clone(),
            offers.clone(),
            &config,
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            Arc::clone(&provider),
            registry.clone(),
            &config,
        ));
        let guard = Arc::new(
            AcceptanceGuard::new(registry.clone(), config.acceptance.local_lock)
                .with_store_timeout(config.services.rpc_timeout()),
        );
        let publisher = RidePublisher::new(
            Arc::clone(&provider),
            config.queues.open_ride_queue.clone(),
        );

        Self {
            config,
            provider,
            registry,
            geo,
            offers,
            dispatch,
            reconciliation,
            guard,
            publisher,
        }
    }

    pub fn queues(&self) -> &InMemoryMessagingService {
        self.provider.as_in_memory().unwrap()
    }

    pub fn open_queue(&self) -> &str {
        &self.config.queues.open_ride_queue
    }

    pub fn pending_queue(&self) -> &str {
        &self.config.queues.pending_offer_queue
    }

    pub async fn open_len(&self) -> usize {
        self.queues().queue_length(self.open_queue()).await
    }

    pub async fn pending_len(&self) -> usize {
        self.queues().queue_length(self.pending_queue()).await
    }

    pub async fn pending_rides(&self) -> Vec<Ride> {
        self.queues()
            .peek_payloads(self.pending_queue())
            .await
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
            .collect()
    }

    pub async fn open_payloads(&self) -> Vec<Vec<u8>> {
        self.queues().peek_payloads(self.open_queue()).await
    }

    /// Put a ride straight onto the pending-offer queue, returning the exact bytes sent
    pub async fn publish_pending(&self, ride: &Ride) -> Vec<u8> {
        let bytes = serde_json::to_vec(ride).unwrap();
        self.provider
            .send_raw(self.pending_queue(), &bytes)
            .await
            .unwrap();
        bytes
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
