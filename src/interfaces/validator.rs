//! The existence check exposed to the rest of a service.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::bus::BusError;

/// Errors from an existence check.
///
/// None of these mean "does not exist"; a definitive negative is `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Validation service unavailable")]
    Unavailable,

    #[error("Validation of entity {entity_id} timed out after {timeout:?}")]
    TimedOut { entity_id: Uuid, timeout: Duration },

    #[error("Failed to publish validation request: {0}")]
    Publish(#[from] BusError),

    #[error("Failed to encode validation request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("HTTP validation failed: {0}")]
    Http(String),
}

impl ValidationError {
    /// Whether the caller should treat this as the owning service being unavailable.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, ValidationError::Encode(_))
    }
}

/// Confirms that an entity owned by another service exists.
///
/// Implementations:
/// - `BrokerValidator`: request/reply over the message broker
/// - `HttpEntityValidator`: synchronous HTTP call with one fallback endpoint
#[async_trait]
pub trait EntityValidator: Send + Sync {
    async fn validate_entity_exists(&self, entity_id: Uuid) -> Result<bool, ValidationError>;
}
