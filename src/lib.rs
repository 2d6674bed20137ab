#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]

//! # Ride Dispatch
//!
//! Ride matching and offer protocol over a durable message queue.
//!
//! A new ride travels open → offered → assigned, re-opened, or dropped as stale:
//!
//! - [`orchestration::DispatchEngine`] consumes the open-ride queue, asks the geo
//!   matcher for nearby drivers, fans offers out, and hands the ride to the
//!   pending-offer queue.
//! - [`orchestration::ReconciliationEngine`] waits out the acceptance window, then
//!   finalizes the ride or sends it back for another dispatch cycle.
//! - [`orchestration::AcceptanceGuard`] assigns each ride to at most one driver,
//!   backed by a unique constraint in the driver registry.
//!
//! ## Module Organization
//!
//! - [`messaging`] - queue transport (PGMQ, RabbitMQ, in-memory)
//! - [`models`] - rides, candidates, drivers, tasks
//! - [`services`] - geo matcher and driver-offer RPC clients
//! - [`registry`] - driver registry (Postgres, in-memory)
//! - [`orchestration`] - the engines and the acceptance guard
//! - [`web`] - HTTP accept endpoint and health probe
//! - [`config`] - TOML + environment configuration
//! - [`logging`] - structured `tracing` setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ride_dispatch::config::DispatchConfig;
//! use ride_dispatch::messaging::MessagingProvider;
//! use ride_dispatch::orchestration::{AcceptanceGuard, ReconciliationEngine};
//! use ride_dispatch::registry::InMemoryDriverRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DispatchConfig::default();
//! let provider = Arc::new(MessagingProvider::new_in_memory());
//! provider.ensure_queues(&config.queues.queue_names()).await?;
//!
//! let registry = Arc::new(InMemoryDriverRegistry::new());
//! let reconciliation = Arc::new(ReconciliationEngine::new(provider, registry.clone(), &config));
//! reconciliation.start();
//!
//! let guard = AcceptanceGuard::new(registry, config.acceptance.local_lock);
//! let _ = guard.accept(7, 42).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod services;
pub mod web;

pub use error::{DispatchError, DispatchResult};
