use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, warn};

use super::response_types::{AcceptResponse, ApiError, EngineHealth, HealthResponse, QueueDepth};
use super::state::AppState;

/// POST /v1/drivers/:driver_id/rides/:ride_id/accept
pub async fn accept_ride(
    State(state): State<AppState>,
    Path((driver_id, ride_id)): Path<(i64, i64)>,
) -> Result<Json<AcceptResponse>, ApiError> {
    debug!(driver_id, ride_id, "Accept request received");

    let confirmation = state.guard.accept(driver_id, ride_id).await?;
    Ok(Json(confirmation.into()))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let queue_healthy = match state.provider.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!(error = %e, "Queue provider health check failed");
            false
        }
    };

    let registry = state.guard.registry();
    let registry_healthy = match registry.health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Driver registry health check failed");
            false
        }
    };

    let mut queues = Vec::with_capacity(state.queues.len());
    for queue_name in &state.queues {
        match state.provider.queue_stats(queue_name).await {
            Ok(stats) => queues.push(QueueDepth::from(stats)),
            Err(e) => warn!(queue = %queue_name, error = %e, "Queue stats unavailable"),
        }
    }

    let healthy = queue_healthy && registry_healthy;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        queue_provider: state.provider.provider_name().to_string(),
        queue_healthy,
        registry: registry.backend_name().to_string(),
        registry_healthy,
        queues,
        dispatch: state
            .dispatch_engine
            .as_ref()
            .map(|e| EngineHealth::new(e.is_running(), e.stats())),
        reconciliation: state
            .reconciliation_engine
            .as_ref()
            .map(|e| EngineHealth::new(e.is_running(), e.stats())),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}
