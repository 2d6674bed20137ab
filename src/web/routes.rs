use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::state::AppState;

/// Routes nested under `/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new().route(
        "/drivers/:driver_id/rides/:ride_id/accept",
        post(handlers::accept_ride),
    )
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}
