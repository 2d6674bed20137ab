//! # Messaging Service Types
//!
//! Core types for the provider-agnostic queue transport.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::traits::QueueMessage;
use super::MessagingError;

/// Unique identifier for a queued message
///
/// The format is provider-specific:
/// - PGMQ: i64 message ID as string
/// - RabbitMQ: session-local publish counter
/// - InMemory: per-queue sequence number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Handle for acknowledging a received message
///
/// - PGMQ: msg_id as string
/// - RabbitMQ: delivery tag as string
/// - InMemory: internal sequence number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Try to parse the receipt handle as an i64 (PGMQ message ids)
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    /// Try to parse the receipt handle as a u64 (AMQP delivery tags, in-memory ids)
    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ReceiptHandle {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for ReceiptHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ReceiptHandle {
    fn from(handle: &str) -> Self {
        Self(handle.to_string())
    }
}

/// A message received from a queue with delivery metadata
///
/// Providers hand back the raw payload; callers decode it with [`QueuedMessage::decode`]
/// so that an unreadable body can still be acknowledged or dead-lettered by handle.
#[derive(Debug, Clone)]
pub struct QueuedMessage<T = Vec<u8>> {
    /// Handle for acknowledging this message
    pub receipt_handle: ReceiptHandle,

    /// The message payload
    pub message: T,

    /// Number of times this message has been delivered, including this delivery
    ///
    /// RabbitMQ only reports a redelivered flag, so the count saturates at 2 there.
    pub receive_count: u32,

    /// When the message was originally enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl<T> QueuedMessage<T> {
    pub fn new(
        receipt_handle: ReceiptHandle,
        message: T,
        receive_count: u32,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            receipt_handle,
            message,
            receive_count,
            enqueued_at,
        }
    }

    /// Map the message to a different type
    pub fn map<U, F>(self, f: F) -> QueuedMessage<U>
    where
        F: FnOnce(T) -> U,
    {
        QueuedMessage {
            receipt_handle: self.receipt_handle,
            message: f(self.message),
            receive_count: self.receive_count,
            enqueued_at: self.enqueued_at,
        }
    }
}

impl QueuedMessage<Vec<u8>> {
    /// Deserialize the raw payload
    pub fn decode<T: QueueMessage>(&self) -> Result<T, MessagingError> {
        T::from_bytes(&self.message)
    }
}

/// Queue statistics for monitoring
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub queue_name: String,

    /// Total number of messages in the queue (visible + invisible)
    pub message_count: u64,

    /// Number of messages currently being processed (invisible)
    ///
    /// Only available for providers that track this.
    pub in_flight_count: Option<u64>,

    /// Age of the oldest message in the queue
    pub oldest_message_age: Option<Duration>,

    pub total_sent: u64,
    pub total_received: u64,
    pub total_acked: u64,
    pub total_nacked: u64,
    pub total_dead_lettered: u64,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            in_flight_count: None,
            oldest_message_age: None,
            total_sent: 0,
            total_received: 0,
            total_acked: 0,
            total_nacked: 0,
            total_dead_lettered: 0,
        }
    }

    pub fn with_in_flight_count(mut self, count: u64) -> Self {
        self.in_flight_count = Some(count);
        self
    }

    pub fn with_oldest_message_age(mut self, age: Duration) -> Self {
        self.oldest_message_age = Some(age);
        self
    }

    /// Set the process-local operation counters
    pub fn with_counters(
        mut self,
        sent: u64,
        received: u64,
        acked: u64,
        nacked: u64,
        dead_lettered: u64,
    ) -> Self {
        self.total_sent = sent;
        self.total_received = received;
        self.total_acked = acked;
        self.total_nacked = nacked;
        self.total_dead_lettered = dead_lettered;
        self
    }
}

/// Health check result for queue verification
#[derive(Debug, Clone, Default)]
pub struct QueueHealthReport {
    /// Queues that exist and are accessible
    pub healthy: Vec<String>,

    /// Queues that don't exist
    pub missing: Vec<String>,

    /// Queues that exist but had errors during verification
    pub errors: Vec<(String, String)>,
}

impl QueueHealthReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if all queues are healthy (none missing or errored)
    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }

    pub fn add_healthy(&mut self, queue_name: impl Into<String>) {
        self.healthy.push(queue_name.into());
    }

    pub fn add_missing(&mut self, queue_name: impl Into<String>) {
        self.missing.push(queue_name.into());
    }

    pub fn add_error(&mut self, queue_name: impl Into<String>, error: impl Into<String>) {
        self.errors.push((queue_name.into(), error.into()));
    }
}
