//! # Web API
//!
//! The one operation this core exposes to outside callers: a driver accepting a
//! ride. Plus a health probe.
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 200 | accepted; body names driver, ride and task |
//! | 404 | driver not found |
//! | 403 | driver blocked |
//! | 409 | ride already accepted |
//! | 503 | conflicting accept, retry after `Retry-After` seconds |

pub mod handlers;
pub mod response_types;
pub mod routes;
pub mod state;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

pub use response_types::{AcceptResponse, ApiError, EngineHealth, HealthResponse, QueueDepth};
pub use state::AppState;

pub fn create_app(app_state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .nest("/v1", routes::api_v1_routes())
        .with_state(app_state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, app_state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Web API listening");
    }
    axum::serve(listener, create_app(app_state))
        .with_graceful_shutdown(shutdown)
        .await
}
