//! # Messaging Service Abstraction Layer
//!
//! Provider-agnostic queue transport with enum dispatch.
//!
//! ```text
//! MessagingProvider (enum)
//!   ├── Pgmq(PgmqMessagingService)
//!   ├── RabbitMq(RabbitMqMessagingService)
//!   └── InMemory(InMemoryMessagingService)
//! ```
//!
//! Every queue is durable, every delivery needs an explicit ack or nack, and the
//! dispatch workers keep at most one message in flight.

mod provider;
pub mod providers;
mod traits;
mod types;

pub use provider::MessagingProvider;
pub use providers::{InMemoryMessagingService, PgmqMessagingService, RabbitMqMessagingService};
pub use traits::{MessagingService, QueueMessage};
pub use types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};

pub use super::errors::MessagingError;
