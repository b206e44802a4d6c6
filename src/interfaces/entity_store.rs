//! Owner-side existence lookup.

use async_trait::async_trait;
use uuid::Uuid;

/// Result type for store lookups.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by an entity store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// The owning service's view of which entities exist.
///
/// Implementations wrap the owner's own persistence; the responder only ever
/// asks this single boolean question.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn exists(&self, entity_id: Uuid) -> Result<bool>;
}
