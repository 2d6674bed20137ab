use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{join_url, parse_base_url, ServiceError, ServiceResult};
use crate::models::Coordinate;

const SERVICE: &str = "offer";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub driver_id: i64,
    pub ride_id: i64,
    pub distance: f64,
    pub coordinate: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferConfirmation {
    #[serde(default)]
    pub message: String,
}

/// Pushes a ride offer to a single driver.
///
/// Delivery is at-least-once: the same `(driver_id, ride_id)` pair can be offered
/// again after a redelivery, so receivers must tolerate duplicates.
#[async_trait]
pub trait DriverOfferClient: Send + Sync + 'static {
    async fn offer(
        &self,
        driver_id: i64,
        ride_id: i64,
        distance: f64,
        coordinate: Coordinate,
    ) -> ServiceResult<OfferConfirmation>;
}

/// `POST {base}/v1/offers` with an [`OfferRequest`] body
#[derive(Debug, Clone)]
pub struct HttpOfferClient {
    client: Client,
    base_url: Url,
}

impl HttpOfferClient {
    pub fn new(base_url: &str, timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::request(SERVICE, e))?;
        Ok(Self {
            client,
            base_url: parse_base_url(SERVICE, base_url)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}

#[async_trait]
impl DriverOfferClient for HttpOfferClient {
    async fn offer(
        &self,
        driver_id: i64,
        ride_id: i64,
        distance: f64,
        coordinate: Coordinate,
    ) -> ServiceResult<OfferConfirmation> {
        let url = join_url(SERVICE, &self.base_url, "/v1/offers")?;
        let request = OfferRequest {
            driver_id,
            ride_id,
            distance,
            coordinate,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::request(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(driver_id, ride_id, status = %status, error = %body, "Offer rejected");
            return Err(ServiceError::status(SERVICE, status.as_u16(), body));
        }

        let confirmation = response
            .json::<OfferConfirmation>()
            .await
            .map_err(|e| ServiceError::decode(SERVICE, e.to_string()))?;

        debug!(driver_id, ride_id, "Offer delivered");
        Ok(confirmation)
    }
}
