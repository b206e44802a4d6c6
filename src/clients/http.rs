//! Synchronous HTTP existence check.
//!
//! Calls `GET {base}/{entityId}/exists` on the owning service, which answers
//! with a JSON boolean. Transport errors and 5xx responses are retried once
//! against the fallback endpoint when one is configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HttpValidatorConfig;
use crate::interfaces::{EntityValidator, ValidationError};

/// Outcome of one endpoint attempt.
enum Attempt {
    Answered(bool),
    /// Worth trying the next endpoint.
    Retryable(String),
    Failed(String),
}

/// Entity validator backed by the owning service's HTTP API.
pub struct HttpEntityValidator {
    client: Client,
    primary_url: String,
    fallback_url: Option<String>,
}

impl HttpEntityValidator {
    pub fn new(config: &HttpValidatorConfig) -> Result<Self, ValidationError> {
        if config.primary_url.trim().is_empty() {
            return Err(ValidationError::Http(
                "HTTP primary_url not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ValidationError::Http(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            primary_url: config.primary_url.clone(),
            fallback_url: config.fallback_url.clone(),
        })
    }

    fn entity_url(base: &str, entity_id: Uuid) -> String {
        format!("{}/{}/exists", base.trim_end_matches('/'), entity_id)
    }

    fn is_retryable(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    async fn attempt(&self, base: &str, entity_id: Uuid) -> Attempt {
        let url = Self::entity_url(base, entity_id);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if Self::is_retryable(&e) => return Attempt::Retryable(e.to_string()),
            Err(e) => return Attempt::Failed(e.to_string()),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Attempt::Answered(false);
        }
        if status.is_server_error() {
            return Attempt::Retryable(format!("{} returned {}", url, status));
        }
        if !status.is_success() {
            return Attempt::Failed(format!("{} returned {}", url, status));
        }

        match response.json::<bool>().await {
            Ok(exists) => Attempt::Answered(exists),
            Err(e) => Attempt::Failed(format!("Invalid response body from {}: {}", url, e)),
        }
    }
}

#[async_trait]
impl EntityValidator for HttpEntityValidator {
    async fn validate_entity_exists(&self, entity_id: Uuid) -> Result<bool, ValidationError> {
        let reason = match self.attempt(&self.primary_url, entity_id).await {
            Attempt::Answered(exists) => {
                debug!(%entity_id, exists, "Validated over HTTP");
                return Ok(exists);
            }
            Attempt::Failed(reason) => return Err(ValidationError::Http(reason)),
            Attempt::Retryable(reason) => reason,
        };

        let Some(fallback) = &self.fallback_url else {
            return Err(ValidationError::Http(reason));
        };
        warn!(%entity_id, error = %reason, "Primary endpoint failed, trying fallback");

        match self.attempt(fallback, entity_id).await {
            Attempt::Answered(exists) => Ok(exists),
            Attempt::Failed(reason) | Attempt::Retryable(reason) => {
                Err(ValidationError::Http(reason))
            }
        }
    }
}
