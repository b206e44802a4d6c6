//! Responder side: answers validation requests from the owner's store.
//!
//! Per request message:
//! ```text
//! Received -> Processing -> Answered (ack)
//!                        -> Answered, publish failed (nack + requeue)
//!          -> Malformed (reject, dead-lettered)
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::bus::{Disposition, InboundMessage, MessageBus, MessageHandler, OutboundMessage};
use crate::config::TopologyConfig;
use crate::interfaces::EntityStore;
use crate::messages::{ValidationRequest, ValidationResponse};

struct Inner {
    store: Arc<dyn EntityStore>,
    bus: Arc<dyn MessageBus>,
    response_routing_key: String,
}

/// Consumer for the request queue.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<Inner>,
}

impl Responder {
    pub fn new(
        store: Arc<dyn EntityStore>,
        bus: Arc<dyn MessageBus>,
        topology: &TopologyConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                response_routing_key: topology.response_routing_key.clone(),
            }),
        }
    }

    /// Answer one request message and decide its disposition.
    #[tracing::instrument(
        name = "validation.respond",
        skip_all,
        fields(redelivered = message.redelivered)
    )]
    pub async fn process(&self, message: &InboundMessage) -> Disposition {
        let request = match ValidationRequest::from_bytes(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "Malformed validation request, dead-lettering");
                return Disposition::DeadLetter;
            }
        };

        debug!(
            message_id = %request.message_id,
            entity_id = %request.entity_id,
            correlation_id = %request.correlation_id,
            "Processing validation request"
        );

        let response = match self.inner.store.exists(request.entity_id).await {
            Ok(exists) => ValidationResponse::answer(&request, exists),
            Err(e) => {
                warn!(
                    entity_id = %request.entity_id,
                    error = %e,
                    "Entity lookup failed, answering not confirmed"
                );
                ValidationResponse::lookup_failed(&request, e.to_string())
            }
        };

        let payload = match response.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode validation response");
                return Disposition::DeadLetter;
            }
        };

        let mut outbound = OutboundMessage::new(&self.inner.response_routing_key, payload)
            .with_message_id(request.message_id.to_string());
        if !request.correlation_id.is_empty() {
            outbound = outbound.with_correlation_id(request.correlation_id.as_str());
        }

        match self.inner.bus.publish(outbound).await {
            Ok(()) => {
                debug!(
                    message_id = %request.message_id,
                    exists = response.exists,
                    "Answered validation request"
                );
                Disposition::Ack
            }
            Err(e) => {
                warn!(
                    message_id = %request.message_id,
                    error = %e,
                    "Failed to publish validation response, requeueing request"
                );
                Disposition::Requeue
            }
        }
    }
}

impl MessageHandler for Responder {
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Disposition> {
        let responder = self.clone();
        Box::pin(async move { responder.process(&message).await })
    }
}
