//! Requester side: entity validation over the broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::dispatcher::ResponseDispatcher;
use super::pending::{PendingError, PendingRequests};
use crate::bus::{MessageBus, OutboundMessage};
use crate::config::TopologyConfig;
use crate::interfaces::{EntityValidator, ValidationError};
use crate::messages::ValidationRequest;

/// Validates entity existence by request/reply over the message broker.
///
/// Each call registers a pending slot, publishes a request and waits for the
/// matching response. A validator created with [`unavailable`](Self::unavailable)
/// (broker unreachable at startup) fails every call immediately.
pub struct BrokerValidator {
    bus: Option<Arc<dyn MessageBus>>,
    pending: PendingRequests,
    request_routing_key: String,
    timeout: Duration,
}

impl BrokerValidator {
    pub fn new(bus: Arc<dyn MessageBus>, topology: &TopologyConfig, timeout: Duration) -> Self {
        Self {
            bus: Some(bus),
            pending: PendingRequests::new(),
            request_routing_key: topology.request_routing_key.clone(),
            timeout,
        }
    }

    /// Degraded validator for when the broker could not be reached.
    pub fn unavailable(topology: &TopologyConfig, timeout: Duration) -> Self {
        Self {
            bus: None,
            pending: PendingRequests::new(),
            request_routing_key: topology.request_routing_key.clone(),
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.bus.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The in-flight request table.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Handler resolving this validator's calls from the response queue.
    pub fn dispatcher(&self) -> ResponseDispatcher {
        ResponseDispatcher::new(self.pending.clone())
    }

    /// Does the entity exist?
    pub async fn exists(&self, entity_id: Uuid) -> Result<bool, ValidationError> {
        self.exists_traced(entity_id, "").await
    }

    /// Does the entity exist? `correlation_id` is carried on the request for tracing.
    #[tracing::instrument(
        name = "validation.request",
        skip(self),
        fields(message_id = tracing::field::Empty)
    )]
    pub async fn exists_traced(
        &self,
        entity_id: Uuid,
        correlation_id: &str,
    ) -> Result<bool, ValidationError> {
        let Some(bus) = &self.bus else {
            warn!("Broker unavailable, skipping validation round trip");
            return Err(ValidationError::Unavailable);
        };

        // Slot is registered before publishing; dropping it on any early return expires it
        let mut slot = self.pending.register();
        let message_id = slot.message_id();
        tracing::Span::current().record("message_id", tracing::field::display(message_id));

        let request = ValidationRequest::for_message(message_id, entity_id, correlation_id);
        let mut message = OutboundMessage::new(&self.request_routing_key, request.to_bytes()?)
            .with_message_id(message_id.to_string());
        if !correlation_id.is_empty() {
            message = message.with_correlation_id(correlation_id);
        }

        if let Err(e) = bus.publish(message).await {
            warn!(error = %e, "Failed to publish validation request");
            return Err(ValidationError::Publish(e));
        }
        debug!("Published validation request");

        match slot.wait(self.timeout).await {
            Ok(exists) => {
                debug!(exists, "Validation answered");
                Ok(exists)
            }
            Err(PendingError::TimedOut) => {
                warn!(timeout_ms = %self.timeout.as_millis(), "Validation timed out");
                Err(ValidationError::TimedOut {
                    entity_id,
                    timeout: self.timeout,
                })
            }
            Err(PendingError::Abandoned) => Err(ValidationError::Unavailable),
        }
    }
}

#[async_trait]
impl EntityValidator for BrokerValidator {
    async fn validate_entity_exists(&self, entity_id: Uuid) -> Result<bool, ValidationError> {
        self.exists(entity_id).await
    }
}
