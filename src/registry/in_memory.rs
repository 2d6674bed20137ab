use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{DriverRegistry, RegistryError, RegistryResult};
use crate::models::driver::DRIVER_STATUS_AVAILABLE;
use crate::models::task::TASK_STATUS_ACCEPTED;
use crate::models::{Driver, NewDriver, NewTask, Task};

#[derive(Debug, Default)]
struct RegistryState {
    drivers: HashMap<i64, Driver>,
    /// Keyed by ride id, which is what makes it unique
    tasks: HashMap<i64, Task>,
    next_driver_id: i64,
    next_task_id: i64,
}

/// Process-local registry with the same uniqueness rules as the Postgres schema.
///
/// Used by tests and by the binary when no database URL is configured. The
/// `fail_*` and `set_task_create_delay` hooks let tests provoke store failures
/// and widen race windows.
#[derive(Debug, Default)]
pub struct InMemoryDriverRegistry {
    state: Mutex<RegistryState>,
    task_lookup_failures: AtomicU32,
    task_create_failures: AtomicU32,
    task_create_delay: Mutex<Option<Duration>>,
}

impl InMemoryDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `get_task_by_ride` fail
    pub fn fail_task_lookups(&self, count: u32) {
        self.task_lookup_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `create_task_transactional` fail
    pub fn fail_task_creates(&self, count: u32) {
        self.task_create_failures.store(count, Ordering::SeqCst);
    }

    /// Pause inside task creation before the uniqueness check runs
    pub fn set_task_create_delay(&self, delay: Option<Duration>) {
        *self.task_create_delay.lock() = delay;
    }

    /// Record a task directly, as another dispatcher instance would
    pub fn insert_task(&self, new_task: NewTask) -> RegistryResult<Task> {
        let mut state = self.state.lock();
        Self::insert_locked(&mut state, new_task)
    }

    pub fn set_blocked(&self, driver_id: i64, blocked: bool) -> RegistryResult<()> {
        let mut state = self.state.lock();
        let driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or(RegistryError::DriverNotFound { driver_id })?;
        driver.blocked = blocked;
        driver.updated_at = Utc::now();
        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    fn insert_locked(state: &mut RegistryState, new_task: NewTask) -> RegistryResult<Task> {
        if state.tasks.contains_key(&new_task.ride_id) {
            return Err(RegistryError::UniqueViolation {
                ride_id: new_task.ride_id,
            });
        }
        state.next_task_id += 1;
        let now = Utc::now();
        let task = Task {
            id: state.next_task_id,
            driver_id: new_task.driver_id,
            ride_id: new_task.ride_id,
            status: TASK_STATUS_ACCEPTED.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.tasks.insert(task.ride_id, task.clone());
        Ok(task)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DriverRegistry for InMemoryDriverRegistry {
    async fn create_driver(&self, new_driver: NewDriver) -> RegistryResult<Driver> {
        let mut state = self.state.lock();
        state.next_driver_id += 1;
        let now = Utc::now();
        let status = if new_driver.status.is_empty() {
            DRIVER_STATUS_AVAILABLE.to_string()
        } else {
            new_driver.status
        };
        let driver = Driver {
            id: state.next_driver_id,
            uuid: Uuid::new_v4(),
            name: new_driver.name,
            email: new_driver.email,
            telephone: new_driver.telephone,
            status,
            blocked: new_driver.blocked,
            created_at: now,
            updated_at: now,
        };
        state.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    async fn get_driver(&self, driver_id: i64) -> RegistryResult<Driver> {
        self.state
            .lock()
            .drivers
            .get(&driver_id)
            .cloned()
            .ok_or(RegistryError::DriverNotFound { driver_id })
    }

    async fn get_task_by_ride(&self, ride_id: i64) -> RegistryResult<Option<Task>> {
        if Self::take_failure(&self.task_lookup_failures) {
            return Err(RegistryError::database("injected task lookup failure"));
        }
        Ok(self.state.lock().tasks.get(&ride_id).cloned())
    }

    async fn create_task_transactional(&self, new_task: NewTask) -> RegistryResult<Task> {
        let delay = *self.task_create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.task_create_failures) {
            return Err(RegistryError::database("injected task create failure"));
        }
        let mut state = self.state.lock();
        Self::insert_locked(&mut state, new_task)
    }

    async fn health_check(&self) -> RegistryResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}
