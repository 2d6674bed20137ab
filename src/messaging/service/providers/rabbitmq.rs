//! # RabbitMQ Messaging Service
//!
//! RabbitMQ implementation of the `MessagingService` trait using the `lapin` crate.
//!
//! ## Features
//!
//! - **AMQP 0.9.1**: Standard RabbitMQ protocol support
//! - **Durable Queues**: Messages survive broker restarts
//! - **Dead Letter Exchanges**: `nack(requeue=false)` routes to `{queue}_dlq`
//! - **Prefetch Control**: Channel QoS from configuration (one in flight by default)
//!
//! ## Key Differences from PGMQ
//!
//! | Feature | PGMQ | RabbitMQ |
//! |---------|------|----------|
//! | Visibility timeout | Native `set_vt()` | Unacked until ack/nack or channel close |
//! | Dead letter | `a_{queue}` archive table | Dead Letter Exchange |
//! | Receipt handle | `i64` msg id | Delivery tag (u64) |
//! | Delayed redelivery | Supported | Not supported; workers sleep instead |

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::RabbitMqConfig;
use crate::messaging::service::traits::MessagingService;
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

#[derive(Debug, Default)]
struct QueueStatistics {
    total_sent: AtomicU64,
    total_received: AtomicU64,
    total_acked: AtomicU64,
    total_nacked: AtomicU64,
    total_dead_lettered: AtomicU64,
}

/// RabbitMQ-based messaging service implementation
#[derive(Debug)]
pub struct RabbitMqMessagingService {
    connection: Connection,
    channel: Channel,
    config: RabbitMqConfig,
    /// Queues already declared by this process (DLX setup is done once)
    created_queues: Arc<RwLock<HashSet<String>>>,
    queue_stats: Arc<RwLock<HashMap<String, Arc<QueueStatistics>>>>,
    publish_counter: AtomicU64,
}

impl RabbitMqMessagingService {
    pub async fn new(config: &RabbitMqConfig) -> Result<Self, MessagingError> {
        Self::from_config(config.clone()).await
    }

    /// Connect, open a channel with publisher confirms, and apply the prefetch limit
    pub async fn from_config(config: RabbitMqConfig) -> Result<Self, MessagingError> {
        let connection = Connection::connect(
            &config.url,
            ConnectionProperties::default().with_connection_name(config.connection_name.clone().into()),
        )
        .await
        .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {e}")))?;

        let channel = connection.create_channel().await.map_err(|e| {
            MessagingError::connection(format!("RabbitMQ channel creation failed: {e}"))
        })?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                MessagingError::configuration("rabbitmq", format!("Failed to enable confirms: {e}"))
            })?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::configuration("rabbitmq", format!("Failed to set QoS: {e}")))?;

        info!(
            url = %redact_url(&config.url),
            prefetch_count = config.prefetch_count,
            "Connected to RabbitMQ"
        );

        Ok(Self {
            connection,
            channel,
            config,
            created_queues: Arc::new(RwLock::new(HashSet::new())),
            queue_stats: Arc::new(RwLock::new(HashMap::new())),
            publish_counter: AtomicU64::new(1),
        })
    }

    pub fn prefetch_count(&self) -> u16 {
        self.config.prefetch_count
    }

    async fn get_or_create_stats(&self, queue_name: &str) -> Arc<QueueStatistics> {
        {
            let stats = self.queue_stats.read().await;
            if let Some(s) = stats.get(queue_name) {
                return s.clone();
            }
        }

        let mut stats = self.queue_stats.write().await;
        stats
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(QueueStatistics::default()))
            .clone()
    }

    /// Declare the dead-letter exchange and queue paired with `queue_name`
    async fn setup_dlx(&self, queue_name: &str) -> Result<(), MessagingError> {
        let dlx_name = format!("{queue_name}_dlx");
        let dlq_name = format!("{queue_name}_dlq");

        self.channel
            .exchange_declare(
                &dlx_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_creation(&dlx_name, format!("DLX creation failed: {e}"))
            })?;

        self.channel
            .queue_declare(
                &dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_creation(&dlq_name, format!("DLQ creation failed: {e}"))
            })?;

        // Routing key = original queue name
        self.channel
            .queue_bind(
                &dlq_name,
                &dlx_name,
                queue_name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::queue_creation(&dlq_name, format!("DLQ binding failed: {e}"))
            })?;

        Ok(())
    }

    fn delivery_tag(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
        receipt_handle
            .as_u64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }
}

/// Strip credentials from an AMQP URL for logging
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl MessagingService for RabbitMqMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        {
            let created = self.created_queues.read().await;
            if created.contains(queue_name) {
                return Ok(());
            }
        }

        self.setup_dlx(queue_name).await?;

        let dlx_name = format!("{queue_name}_dlx");
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dlx_name.into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(queue_name.into()),
        );

        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| {
                MessagingError::queue_creation(queue_name, format!("Queue creation failed: {e}"))
            })?;

        self.created_queues
            .write()
            .await
            .insert(queue_name.to_string());

        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let mut report = QueueHealthReport::new();

        for queue_name in queue_names {
            // Passive declare only checks existence. A failed passive declare closes the
            // channel, so probe on a throwaway channel.
            let probe = self.connection.create_channel().await?;
            match probe
                .queue_declare(
                    queue_name,
                    QueueDeclareOptions {
                        passive: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(_) => report.add_healthy(queue_name),
                Err(e) => {
                    let error_str = e.to_string();
                    if error_str.contains("NOT_FOUND") || error_str.contains("404") {
                        report.add_missing(queue_name);
                    } else {
                        report.add_error(queue_name, error_str);
                    }
                }
            }
        }

        Ok(report)
    }

    async fn send_raw(
        &self,
        queue_name: &str,
        payload: &[u8],
    ) -> Result<MessageId, MessagingError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| MessagingError::send(queue_name, format!("Publish failed: {e}")))?;

        let confirmation = confirm.await.map_err(|e| {
            MessagingError::send(queue_name, format!("Publish confirmation failed: {e}"))
        })?;

        if confirmation.is_nack() {
            return Err(MessagingError::send(queue_name, "Broker rejected publish"));
        }

        let stats = self.get_or_create_stats(queue_name).await;
        stats.total_sent.fetch_add(1, Ordering::Relaxed);

        // AMQP assigns no message id on publish
        let msg_id = self.publish_counter.fetch_add(1, Ordering::Relaxed);
        Ok(MessageId::from(msg_id))
    }

    async fn receive_messages(
        &self,
        queue_name: &str,
        max_messages: usize,
        _visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage>, MessagingError> {
        // Visibility is governed by ack/nack: an unacknowledged delivery stays with this
        // channel until it is settled or the channel closes.
        let mut messages = Vec::with_capacity(max_messages);

        for _ in 0..max_messages {
            match self
                .channel
                .basic_get(queue_name, BasicGetOptions { no_ack: false })
                .await
            {
                Ok(Some(message)) => {
                    let receive_count = if message.delivery.redelivered { 2 } else { 1 };
                    messages.push(QueuedMessage::new(
                        ReceiptHandle::from(message.delivery.delivery_tag),
                        message.delivery.data,
                        receive_count,
                        chrono::Utc::now(),
                    ));
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(MessagingError::receive(
                        queue_name,
                        format!("basic_get failed: {e}"),
                    ));
                }
            }
        }

        if !messages.is_empty() {
            let stats = self.get_or_create_stats(queue_name).await;
            stats
                .total_received
                .fetch_add(messages.len() as u64, Ordering::Relaxed);
        }

        Ok(messages)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let delivery_tag = Self::delivery_tag(receipt_handle)?;

        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::ack(queue_name, delivery_tag, format!("ack failed: {e}")))?;

        let stats = self.get_or_create_stats(queue_name).await;
        stats.total_acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let delivery_tag = Self::delivery_tag(receipt_handle)?;

        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                MessagingError::nack(queue_name, delivery_tag, format!("nack failed: {e}"))
            })?;

        let stats = self.get_or_create_stats(queue_name).await;
        stats.total_nacked.fetch_add(1, Ordering::Relaxed);
        if !requeue {
            stats.total_dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let probe = self.connection.create_channel().await?;
        let queue_state = probe
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_stats(queue_name, format!("Queue query failed: {e}")))?;

        let ours = self.get_or_create_stats(queue_name).await;

        Ok(
            QueueStats::new(queue_name, u64::from(queue_state.message_count())).with_counters(
                ours.total_sent.load(Ordering::Relaxed),
                ours.total_received.load(Ordering::Relaxed),
                ours.total_acked.load(Ordering::Relaxed),
                ours.total_nacked.load(Ordering::Relaxed),
                ours.total_dead_lettered.load(Ordering::Relaxed),
            ),
        )
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        let connected = self.connection.status().connected();
        if !connected {
            warn!("RabbitMQ connection is not in the connected state");
        }
        Ok(connected && self.channel.status().connected())
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}
