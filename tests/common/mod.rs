//! Shared utilities for integration tests.
//!
//! Provides entity stores with scripted behavior and a harness wiring both
//! sides of the exchange onto one in-process channel bus.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use entity_validation::bus::{ChannelBus, MessageBus};
use entity_validation::config::Config;
use entity_validation::services::{attach_requester, attach_responder, BrokerValidator};
use entity_validation::storage::InMemoryEntityStore;
use entity_validation::{EntityStore, StoreError};

/// Store whose every lookup fails.
pub struct FailingStore;

#[async_trait]
impl EntityStore for FailingStore {
    async fn exists(&self, _entity_id: Uuid) -> Result<bool, StoreError> {
        Err(StoreError::Query("relation \"entities\" does not exist".to_string()))
    }
}

/// Store that counts lookups and optionally answers slowly.
pub struct CountingStore {
    inner: InMemoryEntityStore,
    delay: Option<Duration>,
    lookups: AtomicUsize,
}

impl CountingStore {
    pub fn new(entities: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            inner: InMemoryEntityStore::with_entities(entities),
            delay: None,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn slow(entities: impl IntoIterator<Item = Uuid>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(entities)
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityStore for CountingStore {
    async fn exists(&self, entity_id: Uuid) -> Result<bool, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.exists(entity_id).await
    }
}

/// Requester and responder attached to one channel bus.
pub struct Harness {
    pub config: Config,
    pub bus: ChannelBus,
    pub validator: BrokerValidator,
}

impl Harness {
    pub async fn start(store: Arc<dyn EntityStore>) -> Self {
        Self::start_with(Config::for_test(), store).await
    }

    pub async fn start_with(config: Config, store: Arc<dyn EntityStore>) -> Self {
        let bus = ChannelBus::new(&config.topology);
        let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());

        attach_responder(Arc::clone(&shared), store, &config.topology)
            .await
            .expect("responder should attach");
        let validator = attach_requester(shared, &config)
            .await
            .expect("requester should attach");

        Self {
            config,
            bus,
            validator,
        }
    }
}

/// Poll `condition` until it holds, failing the test after a generous bound.
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
