use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::messaging::QueueStats;
use crate::orchestration::{AcceptConfirmation, AcceptError, ConsumerStatsSnapshot};

/// Seconds a caller should wait before retrying a conflicted accept
const ACCEPT_RETRY_AFTER_SECONDS: u64 = 1;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{message}")]
    Retryable { message: String },

    #[error("Internal server error")]
    Internal,
}

impl From<AcceptError> for ApiError {
    fn from(err: AcceptError) -> Self {
        let message = err.to_string();
        match err {
            AcceptError::DriverNotFound { .. } => Self::NotFound { message },
            AcceptError::DriverBlocked { .. } => Self::Forbidden { message },
            AcceptError::AlreadyAccepted { .. } => Self::Conflict { message },
            AcceptError::AcceptConflict { .. } => Self::Retryable { message },
            AcceptError::Registry(e) => {
                tracing::error!(error = %e, "Accept failed on the driver registry");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_code) = match &self {
            ApiError::NotFound { .. } => (StatusCode::NOT_FOUND, "DRIVER_NOT_FOUND"),
            ApiError::Forbidden { .. } => (StatusCode::FORBIDDEN, "DRIVER_BLOCKED"),
            ApiError::Conflict { .. } => (StatusCode::CONFLICT, "ALREADY_ACCEPTED"),
            ApiError::Retryable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "ACCEPT_CONFLICT"),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        if matches!(self, ApiError::Retryable { .. }) {
            return (
                status_code,
                [(header::RETRY_AFTER, ACCEPT_RETRY_AFTER_SECONDS.to_string())],
                body,
            )
                .into_response();
        }

        (status_code, body).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub message: String,
    pub driver_id: i64,
    pub ride_id: i64,
    pub task_id: i64,
}

impl From<AcceptConfirmation> for AcceptResponse {
    fn from(confirmation: AcceptConfirmation) -> Self {
        Self {
            message: confirmation.message,
            driver_id: confirmation.driver_id,
            ride_id: confirmation.ride_id,
            task_id: confirmation.task_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue_provider: String,
    pub queue_healthy: bool,
    pub registry: String,
    pub registry_healthy: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queues: Vec<QueueDepth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<EngineHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<EngineHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDepth {
    pub name: String,
    pub message_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight_count: Option<u64>,
}

impl From<QueueStats> for QueueDepth {
    fn from(stats: QueueStats) -> Self {
        Self {
            name: stats.queue_name,
            message_count: stats.message_count,
            in_flight_count: stats.in_flight_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub running: bool,
    pub messages_received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub deferred: u64,
    pub dead_lettered: u64,
    pub errors: u64,
}

impl EngineHealth {
    pub fn new(running: bool, stats: ConsumerStatsSnapshot) -> Self {
        Self {
            running,
            messages_received: stats.messages_received,
            acked: stats.acked,
            requeued: stats.requeued,
            deferred: stats.deferred,
            dead_lettered: stats.dead_lettered,
            errors: stats.errors,
        }
    }
}
