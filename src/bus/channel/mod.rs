//! In-memory channel-based message bus for single-process deployments.
//!
//! Mirrors the broker topology with one tokio mpsc queue per declared queue:
//! messages are routed by exchange and routing key, requeued messages are
//! redelivered with `redelivered = true`, and dead-lettered messages are
//! forwarded to the queue's dead-letter target. Ideal for local development
//! and testing without external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::topology::TopologyPlan;
use super::{
    BusError, Disposition, InboundMessage, MessageBus, MessageHandler, OutboundMessage, Result,
};
use crate::config::TopologyConfig;

struct QueueSlot {
    sender: mpsc::UnboundedSender<InboundMessage>,
    /// Taken by the first consumer.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

struct Inner {
    plan: TopologyPlan,
    queues: HashMap<String, QueueSlot>,
    /// Remaining injected publish failures per routing key.
    failures: Mutex<HashMap<String, u32>>,
    requeued: AtomicUsize,
    dead_lettered: AtomicUsize,
}

impl Inner {
    /// Deliver to every queue bound to `routing_key` on `exchange`.
    fn route(&self, exchange: &str, message: InboundMessage) -> usize {
        let mut delivered = 0;
        for queue in self.plan.route(exchange, &message.routing_key) {
            if let Some(slot) = self.queues.get(queue) {
                if slot.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn requeue(&self, queue: &str, message: &InboundMessage) {
        self.requeued.fetch_add(1, Ordering::SeqCst);
        if let Some(slot) = self.queues.get(queue) {
            let _ = slot.sender.send(InboundMessage {
                redelivered: true,
                ..message.clone()
            });
        }
    }

    fn dead_letter(&self, queue: &str, message: &InboundMessage) {
        self.dead_lettered.fetch_add(1, Ordering::SeqCst);
        let Some(target) = self.plan.queue(queue).and_then(|q| q.dead_letter.as_ref()) else {
            warn!(queue = %queue, "Rejected message has no dead-letter target, dropping");
            return;
        };

        let routed = self.route(
            &target.exchange,
            InboundMessage {
                routing_key: target.routing_key.clone(),
                ..message.clone()
            },
        );
        debug!(
            queue = %queue,
            dead_letter_exchange = %target.exchange,
            routed,
            "Dead-lettered message"
        );
    }

    async fn take_failure(&self, routing_key: &str) -> bool {
        let mut failures = self.failures.lock().await;
        match failures.get_mut(routing_key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-memory message bus honoring the validation topology.
///
/// Cloning shares the same queues, so the requester and responder sides of a
/// single process can hold their own handle.
#[derive(Clone)]
pub struct ChannelBus {
    inner: Arc<Inner>,
}

impl ChannelBus {
    /// Create a bus with every queue of the topology declared.
    pub fn new(topology: &TopologyConfig) -> Self {
        let plan = TopologyPlan::from_config(topology);
        let queues = plan
            .queues
            .iter()
            .map(|spec| {
                let (sender, receiver) = mpsc::unbounded_channel();
                let slot = QueueSlot {
                    sender,
                    receiver: Mutex::new(Some(receiver)),
                };
                (spec.name.clone(), slot)
            })
            .collect();

        info!(exchange = %plan.exchange, "Channel message bus initialized");

        Self {
            inner: Arc::new(Inner {
                plan,
                queues,
                failures: Mutex::new(HashMap::new()),
                requeued: AtomicUsize::new(0),
                dead_lettered: AtomicUsize::new(0),
            }),
        }
    }

    /// Make the next `count` publishes on `routing_key` fail.
    pub async fn fail_publishes(&self, routing_key: &str, count: u32) {
        self.inner
            .failures
            .lock()
            .await
            .insert(routing_key.to_string(), count);
    }

    /// Number of deliveries returned to their queue by a handler.
    pub fn requeued_count(&self) -> usize {
        self.inner.requeued.load(Ordering::SeqCst)
    }

    /// Number of deliveries rejected without requeue.
    pub fn dead_lettered_count(&self) -> usize {
        self.inner.dead_lettered.load(Ordering::SeqCst)
    }

    /// Drain messages waiting in a queue that has no consumer (e.g. the dead-letter queue).
    pub async fn take_queued(&self, queue: &str) -> Vec<InboundMessage> {
        let mut drained = Vec::new();
        if let Some(slot) = self.inner.queues.get(queue) {
            if let Some(receiver) = slot.receiver.lock().await.as_mut() {
                while let Ok(message) = receiver.try_recv() {
                    drained.push(message);
                }
            }
        }
        drained
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %message.routing_key))]
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if self.inner.take_failure(&message.routing_key).await {
            return Err(BusError::Publish("Injected publish failure".to_string()));
        }

        let inbound = InboundMessage {
            routing_key: message.routing_key,
            payload: message.payload,
            message_id: message.message_id,
            redelivered: false,
        };

        let routed = self.inner.route(&self.inner.plan.exchange, inbound);
        if routed == 0 {
            debug!("Message unroutable, dropped");
        }
        Ok(())
    }

    /// Deliveries are handled one at a time, in queue order.
    async fn consume(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let slot = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| BusError::Subscribe(format!("Queue '{}' is not declared", queue)))?;

        let mut receiver = slot
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| BusError::AlreadyConsuming(queue.to_string()))?;

        let inner = Arc::clone(&self.inner);
        let queue = queue.to_string();

        info!(queue = %queue, "Channel consumer started");

        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let message = Arc::new(message);
                match handler.handle(Arc::clone(&message)).await {
                    Disposition::Ack => {}
                    Disposition::Requeue => inner.requeue(&queue, &message),
                    Disposition::DeadLetter => inner.dead_letter(&queue, &message),
                }
            }
            info!(queue = %queue, "Channel closed, stopping consumer");
        });

        Ok(())
    }
}
