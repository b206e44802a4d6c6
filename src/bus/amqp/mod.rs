//! AMQP (RabbitMQ) message bus implementation.
//!
//! One bus per side of the exchange. The connection pool, the publish channel
//! and each consumer channel are long-lived: they are created at startup and
//! only re-created after the broker closes them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ConnectionProperties,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::topology::{self, Role, TopologyPlan};
use super::{
    BusError, Disposition, InboundMessage, MessageBus, MessageHandler, OutboundMessage, Result,
};
use crate::config::{BrokerConfig, TopologyConfig};
use crate::messages::CONTENT_TYPE_JSON;
use crate::utils::bootstrap::connect_with_retry;

/// Connections kept by the pool: publishing, topology and one per consumer.
const POOL_SIZE: usize = 4;

/// AMQP message bus using RabbitMQ.
///
/// Messages are published to the topology's direct exchange with persistent
/// delivery and publisher confirms. Consumers apply each handler's
/// [`Disposition`] as ack, nack-with-requeue, or reject-without-requeue.
pub struct AmqpBus {
    pool: Pool,
    plan: Arc<TopologyPlan>,
    role: Role,
    prefetch: u16,
    publisher: Mutex<Option<Channel>>,
}

impl AmqpBus {
    /// Connect to the broker, retrying up to `broker.connect_attempts` times.
    pub async fn connect(
        broker: &BrokerConfig,
        topology: &TopologyConfig,
        role: Role,
    ) -> Result<Self> {
        let url = broker
            .url()
            .map_err(|e| BusError::Connection(format!("Invalid broker address: {}", e)))?;
        let manager = Manager::new(url, ConnectionProperties::default());
        let pool = Pool::builder(manager)
            .max_size(POOL_SIZE)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        // Verify connection
        let address = broker.redacted_url();
        let _conn =
            connect_with_retry("broker", &address, broker.connect_attempts, || pool.get())
                .await
                .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;

        info!(
            role = role.as_str(),
            url = %address,
            "Connected to AMQP"
        );

        Ok(Self {
            pool,
            plan: Arc::new(TopologyPlan::from_config(topology)),
            role,
            prefetch: topology.prefetch,
            publisher: Mutex::new(None),
        })
    }

    /// Declare exchanges, queues and bindings on a dedicated channel.
    pub async fn declare_topology(&self) -> Result<()> {
        let channel = Self::open_channel(&self.pool).await?;
        topology::declare(&channel, &self.plan, self.role).await?;
        let _ = channel.close(200, "topology declared").await;
        Ok(())
    }

    async fn open_channel(pool: &Pool) -> Result<Channel> {
        let conn = pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }

    /// The long-lived publish channel, reopened if the broker closed it.
    async fn publish_channel(&self) -> Result<Channel> {
        let mut guard = self.publisher.lock().await;
        if let Some(channel) = guard.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let channel = Self::open_channel(&self.pool).await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to enable confirms: {}", e)))?;

        debug!(role = self.role.as_str(), "Opened publish channel");
        *guard = Some(channel.clone());
        Ok(channel)
    }

    fn properties(message: &OutboundMessage) -> BasicProperties {
        let mut properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_delivery_mode(2); // persistent

        if let Some(id) = &message.message_id {
            properties = properties.with_message_id(id.as_str().into());
        }
        if let Some(id) = &message.correlation_id {
            properties = properties.with_correlation_id(id.as_str().into());
        }
        properties
    }

    /// Set up consumer channel with prefetch and start consuming.
    async fn setup_consumer(
        pool: &Pool,
        plan: &TopologyPlan,
        role: Role,
        queue: &str,
        prefetch: u16,
    ) -> Result<lapin::Consumer> {
        let channel = Self::open_channel(pool).await?;

        // Re-declaring is a no-op unless the broker lost its state
        topology::declare(&channel, plan, role).await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

        let consumer = channel
            .basic_consume(
                queue,
                &role.consumer_tag(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        info!(
            role = role.as_str(),
            queue = %queue,
            prefetch,
            "Consumer connected, processing messages"
        );

        Ok(consumer)
    }

    /// Consumer loop with automatic reconnection and exponential backoff with jitter.
    async fn consume_with_reconnect(
        pool: Pool,
        plan: Arc<TopologyPlan>,
        role: Role,
        queue: String,
        prefetch: u16,
        handler: Arc<dyn MessageHandler>,
        mut consumer: Option<lapin::Consumer>,
    ) {
        use futures::StreamExt;

        // Exponential backoff with jitter to prevent thundering herd
        let backoff_builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter();

        let mut backoff_iter = backoff_builder.build();

        loop {
            let mut active = match consumer.take() {
                Some(active) => active,
                None => match Self::setup_consumer(&pool, &plan, role, &queue, prefetch).await {
                    Ok(active) => {
                        // Reset backoff on successful connection
                        backoff_iter = backoff_builder.build();
                        active
                    }
                    Err(e) => {
                        let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
                        error!(
                            error = %e,
                            backoff_ms = %delay.as_millis(),
                            queue = %queue,
                            "Failed to set up consumer, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                },
            };

            // Deliveries are processed concurrently; prefetch bounds how many are in flight
            while let Some(delivery) = active.next().await {
                match delivery {
                    Ok(delivery) => {
                        tokio::spawn(Self::process_delivery(delivery, Arc::clone(&handler)));
                    }
                    Err(e) => {
                        error!(error = %e, "Consumer delivery error, will reconnect");
                        break;
                    }
                }
            }

            info!(queue = %queue, "Consumer stream ended, reconnecting...");

            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
            tokio::time::sleep(delay).await;
        }
    }

    /// Run the handler and settle the delivery according to its verdict.
    async fn process_delivery(mut delivery: Delivery, handler: Arc<dyn MessageHandler>) {
        let message = Arc::new(InboundMessage {
            routing_key: delivery.routing_key.to_string(),
            payload: std::mem::take(&mut delivery.data),
            message_id: delivery
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.to_string()),
            redelivered: delivery.redelivered,
        });

        let disposition = handler.handle(message).await;
        let settled = match disposition {
            Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
            Disposition::Requeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
            }
            Disposition::DeadLetter => {
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
            }
        };

        if let Err(e) = settled {
            error!(error = %e, disposition = ?disposition, "Failed to settle delivery");
        }
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %message.routing_key))]
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let channel = self.publish_channel().await?;

        let confirmation = channel
            .basic_publish(
                &self.plan.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                Self::properties(&message),
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        if confirmation.is_nack() {
            return Err(BusError::Publish("Broker rejected message".to_string()));
        }

        debug!(
            exchange = %self.plan.exchange,
            routing_key = %message.routing_key,
            "Published message"
        );
        Ok(())
    }

    async fn consume(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        // First setup happens inline so startup surfaces configuration errors
        let consumer =
            Self::setup_consumer(&self.pool, &self.plan, self.role, queue, self.prefetch).await?;

        tokio::spawn(Self::consume_with_reconnect(
            self.pool.clone(),
            Arc::clone(&self.plan),
            self.role,
            queue.to_string(),
            self.prefetch,
            handler,
            Some(consumer),
        ));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_persistent_json() {
        let message = OutboundMessage::new("request", vec![]);
        let properties = AmqpBus::properties(&message);

        assert_eq!(properties.delivery_mode(), &Some(2));
        assert_eq!(
            properties.content_type().as_ref().map(|c| c.as_str()),
            Some(CONTENT_TYPE_JSON)
        );
        assert!(properties.message_id().is_none());
    }

    #[test]
    fn test_properties_carry_ids() {
        let message = OutboundMessage::new("request", vec![])
            .with_message_id("m-1")
            .with_correlation_id("vote-7");
        let properties = AmqpBus::properties(&message);

        assert_eq!(
            properties.message_id().as_ref().map(|c| c.as_str()),
            Some("m-1")
        );
        assert_eq!(
            properties.correlation_id().as_ref().map(|c| c.as_str()),
            Some("vote-7")
        );
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let broker = BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_attempts: 1,
            ..Default::default()
        };

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            AmqpBus::connect(&broker, &TopologyConfig::default(), Role::Requester),
        )
        .await
        .expect("connect should fail fast");

        assert!(matches!(result, Err(BusError::Connection(_))));
    }

    #[tokio::test]
    async fn test_unparseable_host_is_connection_error() {
        let broker = BrokerConfig {
            host: "rabbit host".to_string(),
            ..Default::default()
        };

        let result = AmqpBus::connect(&broker, &TopologyConfig::default(), Role::Responder).await;

        match result {
            Err(BusError::Connection(message)) => {
                assert!(message.contains("Invalid broker address"))
            }
            Err(other) => panic!("expected connection error, got {:?}", other),
            Ok(_) => panic!("expected connection error"),
        }
    }
}
