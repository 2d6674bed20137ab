//! # Messaging Service Providers
//!
//! Concrete implementations of the `MessagingService` trait for different backends.
//!
//! - [`PgmqMessagingService`] - PostgreSQL Message Queue via the pgmq SQL API
//! - [`RabbitMqMessagingService`] - RabbitMQ via the lapin crate
//! - [`InMemoryMessagingService`] - Thread-safe in-memory queues for testing

mod in_memory;
mod pgmq;
mod rabbitmq;

pub use in_memory::{dead_letter_queue_name, InMemoryMessagingService};
pub use pgmq::PgmqMessagingService;
pub use rabbitmq::RabbitMqMessagingService;
