//! # PGMQ Messaging Service
//!
//! PostgreSQL Message Queue implementation over the `pgmq` extension's SQL API.
//!
//! ## Features
//!
//! - **Visibility Timeout**: Built-in PGMQ visibility semantics (`pgmq.read` vt)
//! - **Delayed Redelivery**: `pgmq.set_vt` pushes the next delivery into the future
//! - **Dead Letter**: `nack(requeue=false)` archives to `pgmq.a_{queue}`
//! - **Atomic Operations**: Database transaction guarantees per statement

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use crate::messaging::service::traits::MessagingService;
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

/// PGMQ-based messaging service implementation
///
/// Payloads are stored as `jsonb`, so only JSON bodies can be published.
///
/// # Example
///
/// ```ignore
/// let service = PgmqMessagingService::new("postgresql://localhost/rides", 5).await?;
/// service.ensure_queue("open_ride_queue").await?;
/// service.send_message("open_ride_queue", &ride).await?;
/// ```
#[derive(Debug, Clone)]
pub struct PgmqMessagingService {
    pool: PgPool,
}

fn handle_to_msg_id(receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
    receipt_handle
        .as_i64()
        .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
}

fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

impl PgmqMessagingService {
    /// Connect a dedicated pool to the database hosting the pgmq extension
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, MessagingError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Share an existing pool (e.g. the driver registry's)
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn set_vt(
        &self,
        queue_name: &str,
        msg_id: i64,
        vt_seconds: i32,
    ) -> Result<(), MessagingError> {
        let row = sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(vt_seconds)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::nack(queue_name, msg_id, e.to_string()))?;

        row.map(|_| ())
            .ok_or_else(|| MessagingError::message_not_found(msg_id.to_string()))
    }
}

#[async_trait]
impl MessagingService for PgmqMessagingService {
    #[instrument(skip(self), fields(queue = %queue_name))]
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_creation(queue_name, e.to_string()))?;
        debug!(queue = %queue_name, "PGMQ queue ensured");
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let rows = sqlx::query("SELECT queue_name FROM pgmq.list_queues()")
            .fetch_all(&self.pool)
            .await?;

        let existing: HashSet<String> = rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("queue_name").ok())
            .collect();

        let mut report = QueueHealthReport::new();
        for queue_name in queue_names {
            if existing.contains(queue_name) {
                report.add_healthy(queue_name);
            } else {
                report.add_missing(queue_name);
            }
        }
        Ok(report)
    }

    async fn send_raw(
        &self,
        queue_name: &str,
        payload: &[u8],
    ) -> Result<MessageId, MessagingError> {
        let json: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| MessagingError::serialization(format!("PGMQ payload must be JSON: {e}")))?;

        let msg_id: i64 = sqlx::query_scalar("SELECT * FROM pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(json)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::send(queue_name, e.to_string()))?;

        Ok(MessageId::from(msg_id))
    }

    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage>, MessagingError> {
        let rows = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(seconds(visibility_timeout))
        .bind(i32::try_from(max_messages).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::receive(queue_name, e.to_string()))?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let msg_id: i64 = row.try_get("msg_id")?;
            let read_ct: i32 = row.try_get("read_ct")?;
            let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;
            let message: serde_json::Value = row.try_get("message")?;

            let bytes = serde_json::to_vec(&message)
                .map_err(|e| MessagingError::serialization(e.to_string()))?;

            result.push(QueuedMessage::new(
                ReceiptHandle::from(msg_id),
                bytes,
                u32::try_from(read_ct).unwrap_or(0),
                enqueued_at,
            ));
        }

        Ok(result)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let msg_id = handle_to_msg_id(receipt_handle)?;

        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2::bigint)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::ack(queue_name, msg_id, e.to_string()))?;

        if deleted {
            Ok(())
        } else {
            Err(MessagingError::message_not_found(msg_id.to_string()))
        }
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let msg_id = handle_to_msg_id(receipt_handle)?;

        if requeue {
            return self.set_vt(queue_name, msg_id, 0).await;
        }

        let archived: bool = sqlx::query_scalar("SELECT pgmq.archive($1, $2::bigint)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::nack(queue_name, msg_id, e.to_string()))?;

        if archived {
            Ok(())
        } else {
            Err(MessagingError::message_not_found(msg_id.to_string()))
        }
    }

    async fn nack_with_delay(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let msg_id = handle_to_msg_id(receipt_handle)?;
        // set_vt has whole-second granularity; round up so the delay is never shortened
        let mut vt = seconds(delay);
        if delay.subsec_nanos() > 0 {
            vt = vt.saturating_add(1);
        }
        self.set_vt(queue_name, msg_id, vt).await
    }

    fn supports_delayed_redelivery(&self) -> bool {
        true
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let row = sqlx::query(
            "SELECT queue_length, oldest_msg_age_sec FROM pgmq.metrics($1)",
        )
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_stats(queue_name, e.to_string()))?;

        let Some(row) = row else {
            return Err(MessagingError::queue_not_found(queue_name));
        };

        let queue_length: i64 = row.try_get("queue_length")?;
        let oldest: Option<i32> = row.try_get("oldest_msg_age_sec")?;

        let mut stats = QueueStats::new(queue_name, u64::try_from(queue_length).unwrap_or(0));
        if let Some(age) = oldest.and_then(|s| u64::try_from(s).ok()) {
            stats = stats.with_oldest_message_age(Duration::from_secs(age));
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| MessagingError::health_check(e.to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}
