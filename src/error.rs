use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::orchestration::AcceptError;
use crate::registry::RegistryError;
use crate::services::ServiceError;

/// Top-level error for wiring the dispatcher together
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Accept error: {0}")]
    Accept(#[from] AcceptError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Web server error: {0}")]
    Web(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
