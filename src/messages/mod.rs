//! Wire envelopes exchanged between requester and responder.
//!
//! Both envelopes are JSON with camelCase field names; these names are the
//! contract with other implementations and must not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type set on every published envelope.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Asks the owning service whether an entity exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    /// Correlation key; the response echoes it as `requestMessageId`.
    pub message_id: Uuid,
    /// Entity whose existence is checked.
    pub entity_id: Uuid,
    /// Free-form tracing tag. Not used for dispatch.
    pub correlation_id: String,
    /// Creation instant (informational).
    pub timestamp: DateTime<Utc>,
}

impl ValidationRequest {
    /// Build a request with a fresh message id.
    pub fn new(entity_id: Uuid, correlation_id: impl Into<String>) -> Self {
        Self::for_message(Uuid::new_v4(), entity_id, correlation_id)
    }

    /// Build a request under an already-reserved message id.
    pub fn for_message(
        message_id: Uuid,
        entity_id: Uuid,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            entity_id,
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// The owning service's answer to one [`ValidationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    /// `message_id` of the originating request.
    pub request_message_id: Uuid,
    /// Echo of the requested entity, for diagnostics.
    pub entity_id: Uuid,
    /// Whether the entity exists.
    pub exists: bool,
    /// Set when the owner-side lookup failed; `exists` is then `false`.
    pub error_message: Option<String>,
}

impl ValidationResponse {
    /// Definitive answer for a request.
    pub fn answer(request: &ValidationRequest, exists: bool) -> Self {
        Self {
            request_message_id: request.message_id,
            entity_id: request.entity_id,
            exists,
            error_message: None,
        }
    }

    /// "Not confirmed" answer carrying the lookup failure.
    pub fn lookup_failed(request: &ValidationRequest, error: impl Into<String>) -> Self {
        Self {
            request_message_id: request.message_id,
            entity_id: request.entity_id,
            exists: false,
            error_message: Some(error.into()),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_request_field_names() {
        let request = ValidationRequest::new(Uuid::new_v4(), "vote-42");
        let json: Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();

        assert_eq!(json["messageId"], request.message_id.to_string());
        assert_eq!(json["entityId"], request.entity_id.to_string());
        assert_eq!(json["correlationId"], "vote-42");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_request_from_foreign_producer() {
        let body = br#"{
            "messageId": "6f1c1c9e-8a2f-4b0e-9a55-0d7d4c1f2a10",
            "entityId": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
            "correlationId": "",
            "timestamp": "2024-03-01T12:30:00+01:00"
        }"#;

        let request = ValidationRequest::from_bytes(body).unwrap();
        assert_eq!(
            request.entity_id.to_string(),
            "1b4e28ba-2fa1-11d2-883f-0016d3cca427"
        );
        assert_eq!(request.timestamp.to_rfc3339(), "2024-03-01T11:30:00+00:00");
    }

    #[test]
    fn test_request_ids_are_fresh() {
        let entity = Uuid::new_v4();
        let a = ValidationRequest::new(entity, "");
        let b = ValidationRequest::new(entity, "");
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_response_null_error_message() {
        let request = ValidationRequest::new(Uuid::new_v4(), "");
        let response = ValidationResponse::answer(&request, true);
        let json: Value = serde_json::from_slice(&response.to_bytes().unwrap()).unwrap();

        assert_eq!(json["requestMessageId"], request.message_id.to_string());
        assert_eq!(json["exists"], true);
        assert!(json["errorMessage"].is_null());
    }

    #[test]
    fn test_lookup_failed_is_not_confirmed() {
        let request = ValidationRequest::new(Uuid::new_v4(), "");
        let response = ValidationResponse::lookup_failed(&request, "connection reset");

        assert!(!response.exists);
        assert_eq!(response.error_message.as_deref(), Some("connection reset"));
        assert_eq!(response.entity_id, request.entity_id);
    }

    #[test]
    fn test_malformed_bodies_rejected() {
        assert!(ValidationRequest::from_bytes(b"not json").is_err());
        assert!(ValidationRequest::from_bytes(br#"{"messageId":"nope"}"#).is_err());
        assert!(ValidationResponse::from_bytes(br#"{"exists":true}"#).is_err());
    }
}
