//! # Driver Registry
//!
//! Relational store of drivers and ride assignments ("tasks").
//!
//! The UNIQUE constraint on `tasks.ride_id` is what guarantees at most one
//! assignment per ride across every process; both backends surface a violation
//! as [`RegistryError::UniqueViolation`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Driver, NewDriver, NewTask, Task};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryDriverRegistry;
pub use postgres::{PgDriverRegistry, MIGRATOR};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Driver not found: {driver_id}")]
    DriverNotFound { driver_id: i64 },

    #[error("Task already exists for ride {ride_id}")]
    UniqueViolation { ride_id: i64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Registry {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl RegistryError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Bound a registry call by `deadline`; expiry becomes [`RegistryError::Timeout`]
pub async fn with_store_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    fut: F,
) -> RegistryResult<T>
where
    F: Future<Output = RegistryResult<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .unwrap_or(Err(RegistryError::Timeout {
            operation,
            after: deadline,
        }))
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[async_trait]
pub trait DriverRegistry: Send + Sync + 'static {
    async fn create_driver(&self, new_driver: NewDriver) -> RegistryResult<Driver>;

    /// Fails with `DriverNotFound` when no such driver exists
    async fn get_driver(&self, driver_id: i64) -> RegistryResult<Driver>;

    async fn get_task_by_ride(&self, ride_id: i64) -> RegistryResult<Option<Task>>;

    /// Create the assignment atomically. No partial row is left behind on failure.
    async fn create_task_transactional(&self, new_task: NewTask) -> RegistryResult<Task>;

    async fn health_check(&self) -> RegistryResult<()>;

    fn backend_name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.backend_name())
    }
}
