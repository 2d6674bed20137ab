//! # Structured Logging
//!
//! Environment-aware `tracing` setup for the dispatcher process.
//!
//! - Level comes from `RUST_LOG` when set, otherwise from the environment name in
//!   `RIDE_DISPATCH_ENV` (`production` logs at info, everything else at debug).
//! - `RIDE_DISPATCH_LOG_FORMAT=json` switches the console output to JSON lines.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::models::RideStatus;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging. Safe to call more than once.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_format();

        let text_layer = (!json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(std::io::stdout().is_terminal())
        });
        let json_layer = json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
        });

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(text_layer)
            .with(json_layer);

        // Another subscriber may already be installed (test harnesses, embedding binaries)
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        } else {
            tracing::info!(
                environment = %environment,
                json_output = json,
                pid = std::process::id(),
                "Structured logging initialized"
            );
        }
    });
}

fn get_environment() -> String {
    std::env::var("RIDE_DISPATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn use_json_format() -> bool {
    std::env::var("RIDE_DISPATCH_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log a ride lifecycle transition with the standard field set
pub fn log_ride_transition(ride_id: i64, from: RideStatus, to: RideStatus, details: &str) {
    tracing::info!(
        ride_id,
        from = %from,
        to = %to,
        details = %details,
        "RIDE_TRANSITION"
    );
}
