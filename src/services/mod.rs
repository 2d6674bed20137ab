//! # External RPC Collaborators
//!
//! The geo matcher answers nearest-driver queries; the driver-offer service pushes
//! an offer to one driver. Both are consumed through traits so the engines can run
//! against HTTP clients in production and fakes in tests.

use std::future::Future;
use std::time::Duration;

pub mod errors;
pub mod geo;
pub mod offer;

pub use errors::{ServiceError, ServiceResult};
pub use geo::{GeoMatcher, HttpGeoMatcher, NearestResponse};
pub use offer::{DriverOfferClient, HttpOfferClient, OfferConfirmation, OfferRequest};

/// Run an RPC under a caller-supplied deadline. Expiry becomes `ServiceError::Timeout`.
pub async fn with_deadline<T, F>(service: &'static str, deadline: Duration, call: F) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::timeout(service, deadline)),
    }
}

fn join_url(service: &'static str, base: &reqwest::Url, path: &str) -> ServiceResult<reqwest::Url> {
    base.join(path)
        .map_err(|e| ServiceError::invalid_url(service, format!("{base}{path}: {e}")))
}

fn parse_base_url(service: &'static str, base_url: &str) -> ServiceResult<reqwest::Url> {
    reqwest::Url::parse(base_url).map_err(|e| ServiceError::invalid_url(service, format!("{base_url}: {e}")))
}
