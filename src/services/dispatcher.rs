//! Response dispatcher: resolves pending calls from the response queue.

use std::sync::Arc;

use futures::future::{self, BoxFuture};
use tracing::{debug, error, warn};

use super::pending::PendingRequests;
use crate::bus::{Disposition, InboundMessage, MessageHandler};
use crate::messages::ValidationResponse;

/// What happened to one response message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A waiting call was resolved.
    Resolved,
    /// No call was waiting (timed out already, or not ours).
    Unmatched,
    /// The body could not be decoded.
    Malformed,
}

/// Consumer for the response queue.
///
/// Every response is acknowledged regardless of outcome: there is no live
/// request left to redeliver a malformed or late response against.
#[derive(Clone)]
pub struct ResponseDispatcher {
    pending: PendingRequests,
}

impl ResponseDispatcher {
    pub fn new(pending: PendingRequests) -> Self {
        Self { pending }
    }

    pub fn dispatch(&self, payload: &[u8]) -> DispatchOutcome {
        let response = match ValidationResponse::from_bytes(payload) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Failed to decode validation response, dropping");
                return DispatchOutcome::Malformed;
            }
        };

        if let Some(reason) = &response.error_message {
            warn!(
                message_id = %response.request_message_id,
                entity_id = %response.entity_id,
                error = %reason,
                "Owner could not confirm entity"
            );
        }

        if self
            .pending
            .resolve(response.request_message_id, response.exists)
        {
            debug!(
                message_id = %response.request_message_id,
                exists = response.exists,
                "Resolved validation request"
            );
            DispatchOutcome::Resolved
        } else {
            warn!(
                message_id = %response.request_message_id,
                unmatched_total = self.pending.unmatched_responses(),
                "No pending request for response (late or foreign), dropping"
            );
            DispatchOutcome::Unmatched
        }
    }
}

impl MessageHandler for ResponseDispatcher {
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Disposition> {
        self.dispatch(&message.payload);
        Box::pin(future::ready(Disposition::Ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ValidationRequest;
    use std::time::Duration;
    use uuid::Uuid;

    fn inbound(payload: Vec<u8>) -> Arc<InboundMessage> {
        Arc::new(InboundMessage {
            routing_key: "response".to_string(),
            payload,
            message_id: None,
            redelivered: false,
        })
    }

    #[tokio::test]
    async fn test_resolves_matching_slot() {
        let pending = PendingRequests::new();
        let dispatcher = ResponseDispatcher::new(pending.clone());
        let mut slot = pending.register();

        let request = ValidationRequest::for_message(slot.message_id(), Uuid::new_v4(), "");
        let body = ValidationResponse::answer(&request, true).to_bytes().unwrap();

        assert_eq!(dispatcher.handle(inbound(body)).await, Disposition::Ack);
        assert_eq!(slot.wait(Duration::from_secs(1)).await, Ok(true));
    }

    #[tokio::test]
    async fn test_lookup_failure_resolves_false() {
        let pending = PendingRequests::new();
        let dispatcher = ResponseDispatcher::new(pending.clone());
        let mut slot = pending.register();

        let request = ValidationRequest::for_message(slot.message_id(), Uuid::new_v4(), "");
        let body = ValidationResponse::lookup_failed(&request, "db down")
            .to_bytes()
            .unwrap();

        assert_eq!(dispatcher.dispatch(&body), DispatchOutcome::Resolved);
        assert_eq!(slot.wait(Duration::from_secs(1)).await, Ok(false));
    }

    #[tokio::test]
    async fn test_malformed_response_is_acked() {
        let dispatcher = ResponseDispatcher::new(PendingRequests::new());

        assert_eq!(
            dispatcher.dispatch(b"{\"exists\":"),
            DispatchOutcome::Malformed
        );
        assert_eq!(
            dispatcher.handle(inbound(b"garbage".to_vec())).await,
            Disposition::Ack
        );
    }

    #[tokio::test]
    async fn test_unknown_message_id_is_dropped() {
        let pending = PendingRequests::new();
        let dispatcher = ResponseDispatcher::new(pending.clone());
        let _other = pending.register();

        let request = ValidationRequest::new(Uuid::new_v4(), "");
        let body = ValidationResponse::answer(&request, true).to_bytes().unwrap();

        assert_eq!(dispatcher.dispatch(&body), DispatchOutcome::Unmatched);
        assert_eq!(dispatcher.handle(inbound(body)).await, Disposition::Ack);
        // The unrelated slot is untouched
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.unmatched_responses(), 2);
    }
}
