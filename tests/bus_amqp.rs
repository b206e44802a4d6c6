//! RabbitMQ integration tests using testcontainers.
//!
//! Run with: cargo test --test bus_amqp --features amqp -- --ignored --nocapture
//!
//! These tests spin up RabbitMQ in a container using testcontainers-rs.
//! No manual RabbitMQ setup required, but Docker must be available.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use entity_validation::bus::{
    AmqpBus, BusError, Disposition, InboundMessage, MessageBus, MessageHandler, OutboundMessage,
    Role,
};
use entity_validation::config::{BrokerConfig, Config};
use entity_validation::services::{start_requester, start_responder};
use entity_validation::storage::InMemoryEntityStore;

/// Start a RabbitMQ container and return it with broker settings pointing at it.
async fn start_rabbitmq() -> (testcontainers::ContainerAsync<GenericImage>, BrokerConfig) {
    let container = GenericImage::new("rabbitmq", "3-management")
        .with_exposed_port(5672.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"))
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start rabbitmq container");

    // Brief delay to ensure RabbitMQ is fully ready
    tokio::time::sleep(Duration::from_secs(2)).await;

    let port = container
        .get_host_port_ipv4(5672)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let broker = BrokerConfig {
        host: host.to_string(),
        port,
        connect_attempts: 5,
        ..Default::default()
    };
    println!("RabbitMQ available at: {}", broker.redacted_url());

    (container, broker)
}

/// Forwards every delivery to a channel and acks it.
struct CollectingHandler {
    sender: mpsc::UnboundedSender<InboundMessage>,
}

impl MessageHandler for CollectingHandler {
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Disposition> {
        let _ = self.sender.send((*message).clone());
        Box::pin(future::ready(Disposition::Ack))
    }
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_topology_declare_is_idempotent() {
    let (_container, broker) = start_rabbitmq().await;
    let config = Config {
        broker,
        ..Config::for_test()
    };

    let requester = AmqpBus::connect(&config.broker, &config.topology, Role::Requester)
        .await
        .expect("requester should connect");
    let responder = AmqpBus::connect(&config.broker, &config.topology, Role::Responder)
        .await
        .expect("responder should connect");

    requester.declare_topology().await.expect("first declare");
    responder.declare_topology().await.expect("second declare");
    requester.declare_topology().await.expect("repeat declare");
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_mismatched_declare_is_startup_error() {
    let (_container, broker) = start_rabbitmq().await;
    let config = Config {
        broker,
        ..Config::for_test()
    };

    let first = AmqpBus::connect(&config.broker, &config.topology, Role::Responder)
        .await
        .expect("should connect");
    first.declare_topology().await.expect("first declare");

    let mut conflicting = config.topology.clone();
    conflicting.durable = false;
    let second = AmqpBus::connect(&config.broker, &conflicting, Role::Requester)
        .await
        .expect("should connect");

    let result = second.declare_topology().await;
    assert!(
        matches!(result, Err(BusError::Topology(_))),
        "expected topology error, got {:?}",
        result
    );
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_validation_round_trip() {
    let (_container, broker) = start_rabbitmq().await;
    let config = Config {
        broker,
        ..Config::for_test()
    };
    let known = Uuid::new_v4();

    let handle = start_responder(&config, Arc::new(InMemoryEntityStore::with_entities([known])))
        .await
        .expect("responder should start");
    assert!(handle.is_consuming());

    let validator = start_requester(&config)
        .await
        .expect("requester should start");
    assert!(validator.is_available());

    assert!(validator.exists(known).await.expect("known entity"));
    assert!(!validator
        .exists(Uuid::new_v4())
        .await
        .expect("unknown entity"));
    assert!(validator.pending().is_empty());
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_malformed_request_reaches_dead_letter_queue() {
    let (_container, broker) = start_rabbitmq().await;
    let config = Config {
        broker,
        ..Config::for_test()
    };

    let handle = start_responder(&config, Arc::new(InMemoryEntityStore::new()))
        .await
        .expect("responder should start");
    assert!(handle.is_consuming());

    let observer = AmqpBus::connect(&config.broker, &config.topology, Role::Requester)
        .await
        .expect("observer should connect");
    let (sender, mut receiver) = mpsc::unbounded_channel();
    observer
        .consume(
            &config.topology.dead_letter_routing_key(),
            Arc::new(CollectingHandler { sender }),
        )
        .await
        .expect("should consume dead-letter queue");

    observer
        .publish(OutboundMessage::new(
            config.topology.request_routing_key.as_str(),
            b"not a request".to_vec(),
        ))
        .await
        .expect("publish should be confirmed");

    let dead = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
        .await
        .expect("dead-lettered message should arrive")
        .expect("channel open");
    assert_eq!(dead.payload, b"not a request".to_vec());
}
