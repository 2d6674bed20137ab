//! # Messaging Module
//!
//! Durable, at-least-once queue transport used by the dispatch pipeline.

pub mod errors;
pub mod service;

pub use errors::MessagingError;
pub use service::{
    MessageId, MessagingProvider, MessagingService, QueueHealthReport, QueueMessage, QueueStats,
    QueuedMessage, ReceiptHandle,
};

/// Result alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
