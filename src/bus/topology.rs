//! Validation topology shared by requester and responder.
//!
//! Both sides build the same [`TopologyPlan`] from [`TopologyConfig`] and
//! declare it at startup, so the two declarations cannot drift apart:
//!
//! ```text
//! validation.exchange (direct) --request--> validation.request --(reject)--> validation.dlx
//!                              --response-> validation.response               |
//!                                                      validation.request.dlq <-+
//! ```

use tracing::info;

use crate::config::TopologyConfig;

/// Queue argument naming the dead-letter exchange.
pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
/// Queue argument naming the dead-letter routing key.
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

/// Which side of the exchange is declaring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Publishes requests, consumes responses.
    Requester,
    /// Consumes requests, publishes responses.
    Responder,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Requester => "requester",
            Role::Responder => "responder",
        }
    }

    /// Consumer tag used for this side's queue subscription.
    pub fn consumer_tag(&self) -> String {
        format!("validation-{}-{}", self.as_str(), uuid::Uuid::new_v4())
    }

    /// Queue this side consumes.
    pub fn consumed_queue<'a>(&self, topology: &'a TopologyConfig) -> &'a str {
        match self {
            Role::Requester => &topology.response_queue,
            Role::Responder => &topology.request_queue,
        }
    }
}

/// Where a queue's rejected messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTarget {
    pub exchange: String,
    pub routing_key: String,
}

/// A durable direct exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
}

/// A queue and its declaration flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub dead_letter: Option<DeadLetterTarget>,
}

/// Queue bound to an exchange on one routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Everything declared at startup, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    /// Exchange requests and responses are published to.
    pub exchange: String,
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl TopologyPlan {
    pub fn from_config(config: &TopologyConfig) -> Self {
        let dead_letter_key = config.dead_letter_routing_key();

        let exchanges = vec![
            ExchangeSpec {
                name: config.exchange.clone(),
            },
            ExchangeSpec {
                name: config.dead_letter_exchange.clone(),
            },
        ];

        let queues = vec![
            QueueSpec {
                name: config.request_queue.clone(),
                durable: config.durable,
                exclusive: config.exclusive,
                auto_delete: config.auto_delete,
                dead_letter: Some(DeadLetterTarget {
                    exchange: config.dead_letter_exchange.clone(),
                    routing_key: dead_letter_key.clone(),
                }),
            },
            QueueSpec {
                name: config.response_queue.clone(),
                durable: config.durable,
                exclusive: config.exclusive,
                auto_delete: config.auto_delete,
                dead_letter: None,
            },
            // Dead-lettered requests are kept for inspection regardless of the queue flags.
            QueueSpec {
                name: dead_letter_key.clone(),
                durable: true,
                exclusive: false,
                auto_delete: false,
                dead_letter: None,
            },
        ];

        let bindings = vec![
            BindingSpec {
                queue: config.request_queue.clone(),
                exchange: config.exchange.clone(),
                routing_key: config.request_routing_key.clone(),
            },
            BindingSpec {
                queue: config.response_queue.clone(),
                exchange: config.exchange.clone(),
                routing_key: config.response_routing_key.clone(),
            },
            BindingSpec {
                queue: dead_letter_key.clone(),
                exchange: config.dead_letter_exchange.clone(),
                routing_key: dead_letter_key,
            },
        ];

        Self {
            exchange: config.exchange.clone(),
            exchanges,
            queues,
            bindings,
        }
    }

    /// Queues a direct exchange delivers `routing_key` to.
    pub fn route<'a>(
        &'a self,
        exchange: &'a str,
        routing_key: &'a str,
    ) -> impl Iterator<Item = &'a str> {
        self.bindings
            .iter()
            .filter(move |b| b.exchange == exchange && b.routing_key == routing_key)
            .map(|b| b.queue.as_str())
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }
}

/// Declare the plan on an AMQP channel.
///
/// Re-declaring an identical topology is a no-op on the broker. A queue or
/// exchange that already exists with different arguments fails with
/// PRECONDITION_FAILED, which is surfaced as [`BusError::Topology`].
///
/// [`BusError::Topology`]: super::BusError::Topology
#[cfg(feature = "amqp")]
pub async fn declare(
    channel: &lapin::Channel,
    plan: &TopologyPlan,
    role: Role,
) -> super::Result<()> {
    use lapin::{
        options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
        types::FieldTable,
        ExchangeKind,
    };

    use super::BusError;

    for exchange in &plan.exchanges {
        channel
            .exchange_declare(
                &exchange.name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BusError::Topology(format!(
                    "Failed to declare exchange '{}': {}",
                    exchange.name, e
                ))
            })?;
    }

    for queue in &plan.queues {
        channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    ..Default::default()
                },
                queue_arguments(queue),
            )
            .await
            .map_err(|e| {
                BusError::Topology(format!("Failed to declare queue '{}': {}", queue.name, e))
            })?;
    }

    for binding in &plan.bindings {
        channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BusError::Topology(format!(
                    "Failed to bind queue '{}' on '{}': {}",
                    binding.queue, binding.routing_key, e
                ))
            })?;
    }

    log_declared(plan, role);
    Ok(())
}

/// Declaration arguments for a queue (dead-letter routing, if any).
#[cfg(feature = "amqp")]
pub fn queue_arguments(queue: &QueueSpec) -> lapin::types::FieldTable {
    use lapin::types::{AMQPValue, FieldTable};

    let mut args = FieldTable::default();
    if let Some(target) = &queue.dead_letter {
        args.insert(
            DEAD_LETTER_EXCHANGE_ARG.into(),
            AMQPValue::LongString(target.exchange.clone().into()),
        );
        args.insert(
            DEAD_LETTER_ROUTING_KEY_ARG.into(),
            AMQPValue::LongString(target.routing_key.clone().into()),
        );
    }
    args
}

pub(crate) fn log_declared(plan: &TopologyPlan, role: Role) {
    info!(
        role = role.as_str(),
        exchange = %plan.exchange,
        queues = plan.queues.len(),
        bindings = plan.bindings.len(),
        "Declared validation topology"
    );
}
