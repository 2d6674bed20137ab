//! # In-Memory Messaging Service
//!
//! Thread-safe in-memory queue implementation for tests and local development.
//!
//! ## Features
//!
//! - **Visibility Timeout**: Messages become invisible after receive, re-visible after timeout
//! - **Delayed Redelivery**: `nack_with_delay` pushes the next visibility into the future
//! - **Dead Letter Queues**: `nack(requeue=false)` moves the message to `{queue}_dlq`
//! - **Fault Injection**: `inject_send_failures` makes the next N publishes to a queue fail

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::messaging::service::traits::MessagingService;
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

/// In-memory message with visibility tracking
#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    /// When the message becomes visible again (None = visible now)
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

#[derive(Debug)]
struct InMemoryQueue {
    /// Messages in the queue (FIFO order)
    messages: VecDeque<InMemoryQueuedMessage>,
    next_id: AtomicU64,
    total_sent: AtomicU64,
    total_received: AtomicU64,
    total_acked: AtomicU64,
    total_nacked: AtomicU64,
    total_dead_lettered: AtomicU64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            next_id: AtomicU64::new(1),
            total_sent: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
            total_acked: AtomicU64::new(0),
            total_nacked: AtomicU64::new(0),
            total_dead_lettered: AtomicU64::new(0),
        }
    }

    fn push(&mut self, payload: Vec<u8>, enqueued_at: DateTime<Utc>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.total_sent.fetch_add(1, Ordering::Relaxed);
        self.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            enqueued_at,
            visible_at: None,
            receive_count: 0,
        });
        id
    }

    fn position(&self, message_id: u64) -> Result<usize, MessagingError> {
        self.messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration, MessagingError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| MessagingError::configuration("in_memory", e.to_string()))
}

fn parse_handle(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
    receipt_handle
        .as_u64()
        .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
}

/// Name of the dead-letter queue paired with `queue_name`
pub fn dead_letter_queue_name(queue_name: &str) -> String {
    format!("{queue_name}_dlq")
}

/// In-memory messaging service
///
/// Messages are stored in a `VecDeque` per queue with visibility timeout simulation.
///
/// # Example
///
/// ```rust
/// use ride_dispatch::messaging::service::providers::InMemoryMessagingService;
/// use ride_dispatch::messaging::service::MessagingService;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = InMemoryMessagingService::new();
/// service.ensure_queue("open_ride_queue").await?;
/// service.send_message("open_ride_queue", &serde_json::json!({"id": 42})).await?;
///
/// let messages = service
///     .receive_messages("open_ride_queue", 1, Duration::from_secs(30))
///     .await?;
/// service.ack_message("open_ride_queue", &messages[0].receipt_handle).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    /// Remaining forced publish failures per queue
    send_failures: parking_lot::Mutex<HashMap<String, u32>>,
}

impl Default for InMemoryMessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            send_failures: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Number of messages in a queue, in flight or not
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Number of messages currently deliverable
    pub async fn visible_length(&self, queue_name: &str) -> usize {
        let now = Utc::now();
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| {
                q.messages
                    .iter()
                    .filter(|m| m.visible_at.map(|vt| vt <= now).unwrap_or(true))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Copy of every payload in the queue, oldest first
    pub async fn peek_payloads(&self, queue_name: &str) -> Vec<Vec<u8>> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn clear_queue(&self, queue_name: &str) {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(queue_name) {
            queue.messages.clear();
        }
    }

    /// Make the next `count` publishes to `queue_name` fail
    pub fn inject_send_failures(&self, queue_name: &str, count: u32) {
        self.send_failures
            .lock()
            .insert(queue_name.to_string(), count);
    }

    fn take_send_failure(&self, queue_name: &str) -> bool {
        let mut failures = self.send_failures.lock();
        match failures.get_mut(queue_name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        queues
            .entry(queue_name.to_string())
            .or_insert_with(InMemoryQueue::new);
        queues
            .entry(dead_letter_queue_name(queue_name))
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let queues = self.queues.read().await;
        let mut report = QueueHealthReport::new();

        for name in queue_names {
            if queues.contains_key(name) {
                report.add_healthy(name);
            } else {
                report.add_missing(name);
            }
        }

        Ok(report)
    }

    async fn send_raw(
        &self,
        queue_name: &str,
        payload: &[u8],
    ) -> Result<MessageId, MessagingError> {
        if self.take_send_failure(queue_name) {
            return Err(MessagingError::send(queue_name, "injected publish failure"));
        }

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let id = queue.push(payload.to_vec(), Utc::now());
        Ok(MessageId::from(id))
    }

    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage>, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let visible_until = now + to_chrono(visibility_timeout)?;
        let mut received = Vec::new();

        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }

            let is_visible = msg.visible_at.map(|vt| vt <= now).unwrap_or(true);
            if is_visible {
                msg.visible_at = Some(visible_until);
                msg.receive_count += 1;
                queue.total_received.fetch_add(1, Ordering::Relaxed);

                received.push(QueuedMessage::new(
                    ReceiptHandle::from(msg.id),
                    msg.payload.clone(),
                    msg.receive_count,
                    msg.enqueued_at,
                ));
            }
        }

        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue.position(message_id)?;
        queue.messages.remove(pos);
        queue.total_acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue.position(message_id)?;
        queue.total_nacked.fetch_add(1, Ordering::Relaxed);

        if requeue {
            queue.messages[pos].visible_at = None;
            return Ok(());
        }

        let dead = queue.messages.remove(pos);
        queue.total_dead_lettered.fetch_add(1, Ordering::Relaxed);

        if let Some(dead) = dead {
            let dlq_name = dead_letter_queue_name(queue_name);
            match queues.get_mut(&dlq_name) {
                Some(dlq) => {
                    dlq.push(dead.payload, dead.enqueued_at);
                }
                None => {
                    debug!(queue = %queue_name, "No dead-letter queue declared, dropping message");
                }
            }
        }

        Ok(())
    }

    async fn nack_with_delay(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;
        let delay = to_chrono(delay)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue.position(message_id)?;
        queue.messages[pos].visible_at = Some(Utc::now() + delay);
        queue.total_nacked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn supports_delayed_redelivery(&self) -> bool {
        true
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();

        let in_flight_count = queue
            .messages
            .iter()
            .filter(|m| m.visible_at.map(|vt| vt > now).unwrap_or(false))
            .count() as u64;

        let mut stats = QueueStats::new(queue_name, queue.messages.len() as u64)
            .with_in_flight_count(in_flight_count)
            .with_counters(
                queue.total_sent.load(Ordering::Relaxed),
                queue.total_received.load(Ordering::Relaxed),
                queue.total_acked.load(Ordering::Relaxed),
                queue.total_nacked.load(Ordering::Relaxed),
                queue.total_dead_lettered.load(Ordering::Relaxed),
            );

        if let Some(oldest) = queue.messages.front() {
            if let Ok(age) = (now - oldest.enqueued_at).to_std() {
                stats = stats.with_oldest_message_age(age);
            }
        }

        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    const QUEUE: &str = "open_ride_queue";

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestRide {
        id: i64,
        addr: String,
    }

    fn ride(id: i64) -> TestRide {
        TestRide {
            id,
            addr: format!("Street {id}"),
        }
    }

    async fn service_with_queue() -> InMemoryMessagingService {
        let service = InMemoryMessagingService::new();
        service.ensure_queue(QUEUE).await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_ensure_queue_declares_dead_letter_queue() {
        let service = service_with_queue().await;

        let report = service
            .verify_queues(&[QUEUE.to_string(), dead_letter_queue_name(QUEUE)])
            .await
            .unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.healthy.len(), 2);
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let service = service_with_queue().await;

        let msg_id = service.send_message(QUEUE, &ride(1)).await.unwrap();
        assert_eq!(msg_id.as_str(), "1");

        let received = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].decode::<TestRide>().unwrap(), ride(1));
        assert_eq!(received[0].receive_count, 1);
    }

    #[tokio::test]
    async fn test_single_in_flight_message() {
        let service = service_with_queue().await;
        service.send_message(QUEUE, &ride(1)).await.unwrap();
        service.send_message(QUEUE, &ride(2)).await.unwrap();

        let first = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].decode::<TestRide>().unwrap().id, 1);

        // The in-flight message is skipped; the next one is still deliverable
        let second = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(second[0].decode::<TestRide>().unwrap().id, 2);

        let third = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn test_visibility_timeout_expiry_redelivers() {
        let service = service_with_queue().await;
        service.send_message(QUEUE, &ride(1)).await.unwrap();

        let first = service
            .receive_messages(QUEUE, 1, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let again = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_ack_message() {
        let service = service_with_queue().await;
        service.send_message(QUEUE, &ride(1)).await.unwrap();

        let received = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        service
            .ack_message(QUEUE, &received[0].receipt_handle)
            .await
            .unwrap();

        assert_eq!(service.queue_length(QUEUE).await, 0);

        // Acknowledging twice is an error
        assert!(service
            .ack_message(QUEUE, &received[0].receipt_handle)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_nack_requeue() {
        let service = service_with_queue().await;
        service.send_message(QUEUE, &ride(1)).await.unwrap();

        let received = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        service
            .nack_message(QUEUE, &received[0].receipt_handle, true)
            .await
            .unwrap();

        let again = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let service = service_with_queue().await;
        service.send_raw(QUEUE, b"garbage").await.unwrap();

        let received = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        service
            .nack_message(QUEUE, &received[0].receipt_handle, false)
            .await
            .unwrap();

        assert_eq!(service.queue_length(QUEUE).await, 0);
        let dlq = service.peek_payloads(&dead_letter_queue_name(QUEUE)).await;
        assert_eq!(dlq, vec![b"garbage".to_vec()]);

        let stats = service.queue_stats(QUEUE).await.unwrap();
        assert_eq!(stats.total_dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_nack_with_delay() {
        let service = service_with_queue().await;
        assert!(service.supports_delayed_redelivery());
        service.send_message(QUEUE, &ride(1)).await.unwrap();

        let received = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        service
            .nack_with_delay(QUEUE, &received[0].receipt_handle, Duration::from_millis(80))
            .await
            .unwrap();

        assert_eq!(service.visible_length(QUEUE).await, 0);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(service.visible_length(QUEUE).await, 1);
    }

    #[tokio::test]
    async fn test_injected_send_failures() {
        let service = service_with_queue().await;
        service.inject_send_failures(QUEUE, 1);

        assert!(service.send_message(QUEUE, &ride(1)).await.is_err());
        assert!(service.send_message(QUEUE, &ride(1)).await.is_ok());
        assert_eq!(service.queue_length(QUEUE).await, 1);
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let service = service_with_queue().await;
        for i in 0..5 {
            service.send_message(QUEUE, &ride(i)).await.unwrap();
        }
        service
            .receive_messages(QUEUE, 2, Duration::from_secs(30))
            .await
            .unwrap();

        let stats = service.queue_stats(QUEUE).await.unwrap();
        assert_eq!(stats.message_count, 5);
        assert_eq!(stats.in_flight_count, Some(2));
        assert_eq!(stats.total_sent, 5);
        assert_eq!(stats.total_received, 2);
    }

    #[tokio::test]
    async fn test_queue_not_found() {
        let service = InMemoryMessagingService::new();
        let result = service.send_message("nonexistent", &ride(1)).await;
        assert!(matches!(result, Err(MessagingError::QueueNotFound { .. })));
    }
}
