//! Message bus for validation requests and responses.
//!
//! This module contains:
//! - `MessageBus` trait: publish to the topology's exchange, consume a queue
//! - `MessageHandler` trait: processes one delivery and returns its `Disposition`
//! - `topology`: the shared exchange/queue/binding plan both sides declare
//! - Implementations: AMQP (RabbitMQ), in-process channel

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod topology;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpBus;
pub use channel::ChannelBus;
pub use topology::{Role, TopologyPlan};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Topology declaration failed: {0}")]
    Topology(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Queue '{0}' already has a consumer")]
    AlreadyConsuming(String),
}

/// What the transport does with a delivery once its handler finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; remove from the queue.
    Ack,
    /// Transient failure; return to the queue for another attempt.
    Requeue,
    /// Poison message; reject without requeue so the broker dead-letters it.
    DeadLetter,
}

/// A message to publish on the topology's exchange.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Routing key selecting the destination queue.
    pub routing_key: String,
    /// Serialized envelope.
    pub payload: Vec<u8>,
    /// Broker-level message id property.
    pub message_id: Option<String>,
    /// Broker-level correlation id property.
    pub correlation_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            message_id: None,
            correlation_id: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// A message received from a queue.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Serialized envelope.
    pub payload: Vec<u8>,
    /// Broker-level message id property, if present.
    pub message_id: Option<String>,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
}

/// Handler for processing messages from a queue.
///
/// Registered once per queue at startup.
pub trait MessageHandler: Send + Sync {
    /// Process a delivery and decide its fate.
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Disposition>;
}

/// Interface for publishing to and consuming from the validation topology.
///
/// Implementations:
/// - `AmqpBus`: RabbitMQ via AMQP
/// - `ChannelBus`: in-process tokio channels
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message to the topology's exchange.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Start consuming `queue`, applying each handler verdict to its delivery.
    ///
    /// Spawns a background task and returns once the consumer is registered.
    async fn consume(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;
}
