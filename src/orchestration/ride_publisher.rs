use std::sync::Arc;

use tracing::info;

use crate::messaging::{MessageId, MessagingProvider, MessagingResult};
use crate::models::Ride;

/// Trip-intake side of the open-ride queue: hands a freshly created ride to dispatch
#[derive(Debug, Clone)]
pub struct RidePublisher {
    provider: Arc<MessagingProvider>,
    open_ride_queue: String,
}

impl RidePublisher {
    pub fn new(provider: Arc<MessagingProvider>, open_ride_queue: impl Into<String>) -> Self {
        Self {
            provider,
            open_ride_queue: open_ride_queue.into(),
        }
    }

    /// Publish an open ride. Any `offered_at` stamp is cleared; open rides carry none.
    pub async fn publish(&self, ride: &Ride) -> MessagingResult<MessageId> {
        let mut open = ride.clone();
        open.offered_at = None;

        let message_id = self
            .provider
            .send_message(&self.open_ride_queue, &open)
            .await?;

        info!(ride_id = ride.id, message_id = %message_id, queue = %self.open_ride_queue, "Ride published");
        Ok(message_id)
    }
}
