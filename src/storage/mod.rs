//! Entity store implementations.
//!
//! The owning service normally plugs in its own persistence behind
//! [`EntityStore`]; the in-memory store backs the standalone responder and tests.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::interfaces::entity_store::{EntityStore, Result};

/// Entity store holding a set of known ids in memory.
#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: RwLock<HashSet<Uuid>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            entities: RwLock::new(entities.into_iter().collect()),
        }
    }

    pub async fn insert(&self, entity_id: Uuid) -> bool {
        self.entities.write().await.insert(entity_id)
    }

    pub async fn remove(&self, entity_id: Uuid) -> bool {
        self.entities.write().await.remove(&entity_id)
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn exists(&self, entity_id: Uuid) -> Result<bool> {
        Ok(self.entities.read().await.contains(&entity_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exists_tracks_inserts_and_removals() {
        let store = InMemoryEntityStore::new();
        let id = Uuid::new_v4();

        assert!(!store.exists(id).await.unwrap());
        assert!(store.insert(id).await);
        assert!(store.exists(id).await.unwrap());
        assert!(store.remove(id).await);
        assert!(!store.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_with_entities() {
        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        let store = InMemoryEntityStore::with_entities(ids);

        assert_eq!(store.len().await, 2);
        assert!(store.exists(ids[1]).await.unwrap());
    }
}
