use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::{DriverRegistry, RegistryError, RegistryResult};
use crate::models::{Driver, NewDriver, NewTask, Task};

/// Schema for drivers and tasks, embedded from `migrations/`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct PgDriverRegistry {
    pool: PgPool,
}

impl PgDriverRegistry {
    pub async fn connect(database_url: &str, max_connections: u32) -> RegistryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Driver registry connected");
        Ok(Self { pool })
    }

    pub fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> RegistryResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| RegistryError::database(format!("migration failed: {e}")))
    }
}

fn map_insert_error(err: sqlx::Error, ride_id: i64) -> RegistryError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RegistryError::UniqueViolation { ride_id }
        }
        _ => RegistryError::from(err),
    }
}

#[async_trait]
impl DriverRegistry for PgDriverRegistry {
    async fn create_driver(&self, new_driver: NewDriver) -> RegistryResult<Driver> {
        Ok(Driver::create(&self.pool, new_driver).await?)
    }

    async fn get_driver(&self, driver_id: i64) -> RegistryResult<Driver> {
        Driver::find_by_id(&self.pool, driver_id)
            .await?
            .ok_or(RegistryError::DriverNotFound { driver_id })
    }

    async fn get_task_by_ride(&self, ride_id: i64) -> RegistryResult<Option<Task>> {
        Ok(Task::find_by_ride_id(&self.pool, ride_id).await?)
    }

    async fn create_task_transactional(&self, new_task: NewTask) -> RegistryResult<Task> {
        let mut tx = self.pool.begin().await?;

        let task = match Task::create_in_transaction(&mut *tx, new_task).await {
            Ok(task) => task,
            Err(e) => {
                // Dropping the transaction rolls it back
                let err = map_insert_error(e, new_task.ride_id);
                warn!(ride_id = new_task.ride_id, driver_id = new_task.driver_id, error = %err, "Task insert failed");
                return Err(err);
            }
        };

        tx.commit()
            .await
            .map_err(|e| map_insert_error(e, new_task.ride_id))?;

        debug!(task_id = task.id, ride_id = task.ride_id, driver_id = task.driver_id, "Task committed");
        Ok(task)
    }

    async fn health_check(&self) -> RegistryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
