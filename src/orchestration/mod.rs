//! # Orchestration
//!
//! The ride matching and offer protocol.
//!
//! ```text
//! RidePublisher ──► open_ride_queue ──► DispatchEngine ──(geo + offers)──► pending_offer_queue
//!                        ▲                                                        │
//!                        └──────────── ReconciliationEngine ◄─────────────────────┘
//!                                             │
//!                         AcceptanceGuard ──► tasks (unique per ride)
//! ```

pub mod acceptance_guard;
pub mod consumer;
pub mod dispatch_engine;
pub mod reconciliation_engine;
pub mod ride_publisher;
pub mod types;

pub use acceptance_guard::{AcceptConfirmation, AcceptError, AcceptanceGuard};
pub use consumer::{ConsumerLoop, ConsumerStats, ConsumerStatsSnapshot, MalformedPolicy};
pub use dispatch_engine::DispatchEngine;
pub use reconciliation_engine::ReconciliationEngine;
pub use ride_publisher::RidePublisher;
pub use types::{DispatchOutcome, ReconciliationOutcome};
