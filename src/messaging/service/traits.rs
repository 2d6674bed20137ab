//! # Messaging Service Traits
//!
//! Core trait definitions for the provider-agnostic queue transport.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};
use super::MessagingError;

/// Core messaging service trait - provider-agnostic operations
///
/// Implementations provide the actual queue backend (PGMQ, RabbitMQ, InMemory).
/// Every backend must support:
///
/// - Durable queue declaration (idempotent)
/// - Persistent publish
/// - Receive with manual acknowledgement and a visibility/in-flight window
/// - Acknowledge, and negative-acknowledge with a requeue flag
///
/// Payloads travel as raw bytes. Typed send is layered on top through [`QueueMessage`],
/// and typed decode happens at the consumer so that an unreadable body still has a
/// receipt handle the consumer can settle.
#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Create a durable queue and its dead-letter target if they don't exist
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    /// Bulk queue creation (called during bootstrap)
    async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        for queue_name in queue_names {
            self.ensure_queue(queue_name).await?;
        }
        Ok(())
    }

    /// Verify expected queues exist (startup health check)
    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError>;

    /// Publish an already-serialized payload, persistently
    async fn send_raw(&self, queue_name: &str, payload: &[u8])
        -> Result<MessageId, MessagingError>;

    /// Serialize and publish a message
    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let bytes = message.to_bytes()?;
        self.send_raw(queue_name, &bytes).await
    }

    /// Receive up to `max_messages` raw messages
    ///
    /// Received messages stay in flight (invisible to other consumers) until they are
    /// acknowledged, negative-acknowledged, or `visibility_timeout` expires. The
    /// dispatch workers always pass `max_messages = 1`.
    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage>, MessagingError>;

    /// Acknowledge successful processing (remove the message)
    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Negative acknowledge
    ///
    /// # Arguments
    ///
    /// * `requeue` - If true, the message becomes deliverable again immediately.
    ///   If false, it moves to the queue's dead-letter target.
    ///
    /// # Provider Behavior
    ///
    /// - **PGMQ**: `requeue=true` resets the visibility timeout to zero;
    ///   `requeue=false` archives to `a_{queue_name}`.
    /// - **RabbitMQ**: `basic_nack` with the requeue flag; `requeue=false` routes through
    ///   the queue's dead-letter exchange.
    /// - **InMemory**: `requeue=false` moves the message to `{queue_name}_dlq`.
    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    /// Negative acknowledge with scheduled redelivery
    ///
    /// The message is requeued but stays invisible for `delay`, so the consumer
    /// is free to take other work while the message waits.
    ///
    /// Providers without native support return
    /// [`MessagingError::DelayedRedeliveryUnsupported`]; check
    /// [`MessagingService::supports_delayed_redelivery`] first.
    async fn nack_with_delay(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let _ = (queue_name, receipt_handle, delay);
        Err(MessagingError::delayed_redelivery_unsupported(
            self.provider_name(),
        ))
    }

    /// Whether [`MessagingService::nack_with_delay`] is natively supported
    fn supports_delayed_redelivery(&self) -> bool {
        false
    }

    /// Get queue statistics
    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    /// Verify the backend is reachable
    async fn health_check(&self) -> Result<bool, MessagingError>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Message serialization contract
///
/// Types implementing this trait can be sent through the messaging system.
/// JSON is the only wire format the dispatch queues use.
pub trait QueueMessage: Send + Sync + 'static {
    /// Serialize the message to bytes
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError>;

    /// Deserialize the message from bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError>
    where
        Self: Sized;
}

/// Blanket implementation providing JSON serialization for any serde-compatible type
impl<T> QueueMessage for T
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes).map_err(|e| MessagingError::deserialization(e.to_string()))
    }
}
