use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Driver record owned by the driver registry
/// Maps to `drivers` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Driver {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub email: String,
    pub telephone: String,
    pub status: String,
    /// A blocked driver can never be assigned a ride
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Driver for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDriver {
    pub name: String,
    pub email: String,
    pub telephone: String,
    #[serde(default = "default_driver_status")]
    pub status: String,
    #[serde(default)]
    pub blocked: bool,
}

pub const DRIVER_STATUS_AVAILABLE: &str = "available";

fn default_driver_status() -> String {
    DRIVER_STATUS_AVAILABLE.to_string()
}

impl NewDriver {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        telephone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            telephone: telephone.into(),
            status: default_driver_status(),
            blocked: false,
        }
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }
}

impl Driver {
    pub async fn create(pool: &PgPool, new_driver: NewDriver) -> Result<Driver, sqlx::Error> {
        sqlx::query_as::<_, Driver>(
            r#"
            INSERT INTO drivers (uuid, name, email, telephone, status, blocked)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, uuid, name, email, telephone, status, blocked, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_driver.name)
        .bind(new_driver.email)
        .bind(new_driver.telephone)
        .bind(new_driver.status)
        .bind(new_driver.blocked)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Driver>, sqlx::Error> {
        sqlx::query_as::<_, Driver>(
            r#"
            SELECT id, uuid, name, email, telephone, status, blocked, created_at, updated_at
            FROM drivers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}
