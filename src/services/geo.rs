use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{join_url, parse_base_url, ServiceError, ServiceResult};
use crate::models::{sort_by_distance, Candidate, Coordinate};

const SERVICE: &str = "geo";

/// Nearest-neighbor lookup over available drivers
#[async_trait]
pub trait GeoMatcher: Send + Sync + 'static {
    /// Drivers within `radius_km` of `coordinate`, closest first
    async fn nearest(&self, coordinate: Coordinate, radius_km: f64) -> ServiceResult<Vec<Candidate>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// `GET {base}/v1/nearest?lat=..&lon=..&radius=..`
#[derive(Debug, Clone)]
pub struct HttpGeoMatcher {
    client: Client,
    base_url: Url,
}

impl HttpGeoMatcher {
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
impl GeoMatcher for HttpGeoMatcher {
    async fn nearest(&self, coordinate: Coordinate, radius_km: f64) -> ServiceResult<Vec<Candidate>> {
        let url = join_url(SERVICE, &self.base_url, "/v1/nearest")?;

        debug!(url = %url, lat = coordinate.lat, lon = coordinate.lon, radius_km, "Querying nearest drivers");

        let response = self
            .client
            .get(url)
            .query(&[
                ("lat", coordinate.lat),
                ("lon", coordinate.lon),
                ("radius", radius_km),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::request(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = %status, error = %body, "Geo matcher query failed");
            return Err(ServiceError::status(SERVICE, status.as_u16(), body));
        }

        let mut body = response
            .json::<NearestResponse>()
            .await
            .map_err(|e| ServiceError::decode(SERVICE, e.to_string()))?;

        // The matcher promises ascending order; enforce it without disturbing ties
        sort_by_distance(&mut body.candidates);

        debug!(candidates = body.candidates.len(), "Nearest drivers received");
        Ok(body.candidates)
    }
}
