use std::time::Duration;

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure of an outbound RPC to the geo matcher or the driver-offer service.
///
/// Every variant is treated by the engines as a transient failure.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be decoded: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error("{service} did not answer within {after:?}")]
    Timeout {
        service: &'static str,
        after: Duration,
    },

    #[error("Invalid {service} URL: {message}")]
    InvalidUrl {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn request(service: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout {
                service,
                after: Duration::ZERO,
            };
        }
        Self::Request { service, source }
    }

    pub fn status(service: &'static str, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            service,
            status,
            body: body.into(),
        }
    }

    pub fn decode(service: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            service,
            message: message.into(),
        }
    }

    pub fn timeout(service: &'static str, after: Duration) -> Self {
        Self::Timeout { service, after }
    }

    pub fn invalid_url(service: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            service,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn service(&self) -> &'static str {
        match self {
            Self::Request { service, .. }
            | Self::Status { service, .. }
            | Self::Decode { service, .. }
            | Self::Timeout { service, .. }
            | Self::InvalidUrl { service, .. } => service,
        }
    }
}
