//! # Acceptance Guard
//!
//! Assigns a ride to exactly one driver. The store's unique constraint on
//! `tasks.ride_id` decides every race; the per-ride in-process lock only spares
//! the losing caller a failed insert when both requests land on this process.
//!
//! Every registry call runs under the store deadline so a stalled store cannot
//! hold a ride lock indefinitely.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::constants::defaults;
use crate::logging::log_ride_transition;
use crate::models::{NewTask, RideStatus};
use crate::registry::{with_store_deadline, DriverRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("Driver not found: {driver_id}")]
    DriverNotFound { driver_id: i64 },

    #[error("Driver {driver_id} is blocked")]
    DriverBlocked { driver_id: i64 },

    #[error("Ride has been already accepted RideID={ride_id}")]
    AlreadyAccepted { ride_id: i64 },

    /// Retryable: the transaction failed or lost a concurrent race
    #[error("Could not record acceptance of ride {ride_id}, retry")]
    AcceptConflict { ride_id: i64 },

    #[error("Driver registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl AcceptError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcceptConflict { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptConfirmation {
    pub message: String,
    pub driver_id: i64,
    pub ride_id: i64,
    pub task_id: i64,
}

#[derive(Debug)]
pub struct AcceptanceGuard {
    registry: Arc<dyn DriverRegistry>,
    local_lock: bool,
    store_timeout: Duration,
    ride_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl AcceptanceGuard {
    pub fn new(registry: Arc<dyn DriverRegistry>, local_lock: bool) -> Self {
        Self {
            registry,
            local_lock,
            store_timeout: defaults::RPC_TIMEOUT,
            ride_locks: DashMap::new(),
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<dyn DriverRegistry> {
        &self.registry
    }

    #[instrument(skip(self))]
    pub async fn accept(&self, driver_id: i64, ride_id: i64) -> Result<AcceptConfirmation, AcceptError> {
        let driver = match with_store_deadline(
            "driver lookup",
            self.store_timeout,
            self.registry.get_driver(driver_id),
        )
        .await
        {
            Ok(driver) => driver,
            Err(RegistryError::DriverNotFound { driver_id }) => {
                return Err(AcceptError::DriverNotFound { driver_id })
            }
            Err(e) => return Err(e.into()),
        };
        if driver.blocked {
            warn!("Blocked driver attempted to accept a ride");
            return Err(AcceptError::DriverBlocked { driver_id });
        }

        let result = if self.local_lock {
            let lock = Arc::clone(self.ride_locks.entry(ride_id).or_default().value());
            let result = {
                let _held = lock.lock().await;
                self.check_and_create(driver_id, ride_id).await
            };
            // Only the map and this call hold the lock: nobody is waiting on it
            self.ride_locks
                .remove_if(&ride_id, |_, l| Arc::strong_count(l) <= 2);
            result
        } else {
            self.check_and_create(driver_id, ride_id).await
        };

        let task = result?;
        log_ride_transition(
            ride_id,
            RideStatus::Offered,
            RideStatus::Assigned,
            &format!("driver {driver_id} accepted"),
        );
        info!(task_id = task.id, "Ride accepted");

        Ok(AcceptConfirmation {
            message: format!("Driver {driver_id} accepted the ride {ride_id}"),
            driver_id,
            ride_id,
            task_id: task.id,
        })
    }

    async fn check_and_create(
        &self,
        driver_id: i64,
        ride_id: i64,
    ) -> Result<crate::models::Task, AcceptError> {
        let existing = with_store_deadline(
            "task lookup",
            self.store_timeout,
            self.registry.get_task_by_ride(ride_id),
        )
        .await?;
        if existing.is_some() {
            return Err(AcceptError::AlreadyAccepted { ride_id });
        }

        // An expired create may still commit; the retry then sees AlreadyAccepted
        with_store_deadline(
            "task create",
            self.store_timeout,
            self.registry.create_task_transactional(NewTask { driver_id, ride_id }),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "Task creation failed");
            AcceptError::AcceptConflict { ride_id }
        })
    }

    /// Rides with a live in-process lock entry
    pub fn locked_rides(&self) -> usize {
        self.ride_locks.len()
    }
}
