use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

/// Assignment of a ride to a driver
/// Maps to `tasks` table; `ride_id` carries a UNIQUE constraint
///
/// Created once by a successful accept and never updated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub driver_id: i64,
    pub ride_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub driver_id: i64,
    pub ride_id: i64,
}

pub const TASK_STATUS_ACCEPTED: &str = "accepted";

impl Task {
    /// Insert inside a caller-owned transaction
    pub async fn create_in_transaction(
        conn: &mut PgConnection,
        new_task: NewTask,
    ) -> Result<Task, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (driver_id, ride_id, status)
            VALUES ($1, $2, $3)
            RETURNING id, driver_id, ride_id, status, created_at, updated_at
            "#,
        )
        .bind(new_task.driver_id)
        .bind(new_task.ride_id)
        .bind(TASK_STATUS_ACCEPTED)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_ride_id(pool: &PgPool, ride_id: i64) -> Result<Option<Task>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            r#"
            SELECT id, driver_id, ride_id, status, created_at, updated_at
            FROM tasks
            WHERE ride_id = $1
            "#,
        )
        .bind(ride_id)
        .fetch_optional(pool)
        .await
    }
}
