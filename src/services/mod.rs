//! Validation services: the requester and responder sides of the exchange.
//!
//! `attach_*` wire a side onto any [`MessageBus`]; `start_*` connect to the
//! broker first and degrade instead of failing when it is unreachable.

pub mod dispatcher;
pub mod pending;
pub mod requester;
pub mod responder;

pub use dispatcher::{DispatchOutcome, ResponseDispatcher};
pub use pending::{PendingError, PendingRequests, PendingResponse};
pub use requester::BrokerValidator;
pub use responder::Responder;

use std::sync::Arc;

use tracing::info;

use crate::bus::{BusError, MessageBus};
use crate::config::{Config, TopologyConfig};
use crate::interfaces::EntityStore;

/// A running (or idle) responder.
pub struct ResponderHandle {
    /// Keeps the consuming bus alive for as long as the handle is held.
    bus: Option<Arc<dyn MessageBus>>,
}

impl ResponderHandle {
    /// Responder that never reached the broker and consumes nothing.
    pub fn idle() -> Self {
        Self { bus: None }
    }

    pub fn is_consuming(&self) -> bool {
        self.bus.is_some()
    }
}

/// Build a validator on `bus` and start dispatching the response queue to it.
pub async fn attach_requester(
    bus: Arc<dyn MessageBus>,
    config: &Config,
) -> Result<BrokerValidator, BusError> {
    let validator =
        BrokerValidator::new(Arc::clone(&bus), &config.topology, config.requester.timeout());
    bus.consume(
        &config.topology.response_queue,
        Arc::new(validator.dispatcher()),
    )
    .await?;

    info!(
        queue = %config.topology.response_queue,
        timeout_ms = config.requester.timeout_ms,
        "Requester attached"
    );
    Ok(validator)
}

/// Start answering the request queue on `bus` from `store`.
pub async fn attach_responder(
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn EntityStore>,
    topology: &TopologyConfig,
) -> Result<ResponderHandle, BusError> {
    let responder = Responder::new(store, Arc::clone(&bus), topology);
    bus.consume(&topology.request_queue, Arc::new(responder))
        .await?;

    info!(queue = %topology.request_queue, "Responder attached");
    Ok(ResponderHandle { bus: Some(bus) })
}

/// Connect to the broker as the requester.
///
/// An unreachable broker yields a validator whose calls fail with
/// `ValidationError::Unavailable`. A topology that conflicts with what the
/// broker already holds is a startup error.
#[cfg(feature = "amqp")]
pub async fn start_requester(config: &Config) -> Result<BrokerValidator, BusError> {
    use crate::bus::{AmqpBus, Role};

    let bus = match AmqpBus::connect(&config.broker, &config.topology, Role::Requester).await {
        Ok(bus) => bus,
        Err(e) => {
            tracing::error!(
                error = %e,
                url = %config.broker.redacted_url(),
                "Broker unreachable, entity validation disabled"
            );
            return Ok(BrokerValidator::unavailable(
                &config.topology,
                config.requester.timeout(),
            ));
        }
    };

    bus.declare_topology().await?;
    attach_requester(Arc::new(bus), config).await
}

/// Connect to the broker as the responder and start consuming requests.
///
/// An unreachable broker yields an idle handle; the owning service keeps
/// running without answering.
#[cfg(feature = "amqp")]
pub async fn start_responder(
    config: &Config,
    store: Arc<dyn EntityStore>,
) -> Result<ResponderHandle, BusError> {
    use crate::bus::{AmqpBus, Role};

    let bus = match AmqpBus::connect(&config.broker, &config.topology, Role::Responder).await {
        Ok(bus) => bus,
        Err(e) => {
            tracing::error!(
                error = %e,
                url = %config.broker.redacted_url(),
                "Broker unreachable, responder not consuming"
            );
            return Ok(ResponderHandle::idle());
        }
    };

    bus.declare_topology().await?;
    attach_responder(Arc::new(bus), store, &config.topology).await
}
