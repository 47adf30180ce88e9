//! # In-Memory Message Bus
//!
//! Single-process broker with AMQP-like topology (exchanges, queues,
//! bindings). Each queue is an unbounded tokio channel; each consumer is a
//! spawned task that awaits its handler before pulling the next message.

use crate::envelope::{Delivery, MessageProperties, PublishOptions};
use crate::port::{
    BusError, ConsumerTag, ExchangeKind, ExchangeOptions, MessageBus, MessageHandler, QueueInfo,
    QueueOptions,
};
use crate::topic::topic_matches;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the implicit exchange that routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

struct Binding {
    queue: String,
    routing_key: String,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

impl Exchange {
    fn routes(&self, routing_key: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.bindings
            .iter()
            .filter(|b| match self.kind {
                ExchangeKind::Direct => b.routing_key == routing_key,
                ExchangeKind::Topic => topic_matches(&b.routing_key, routing_key),
                ExchangeKind::Fanout => true,
            })
            .filter(|b| seen.insert(b.queue.clone()))
            .map(|b| b.queue.clone())
            .collect()
    }
}

struct Queue {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    options: QueueOptions,
    depth: Arc<AtomicUsize>,
    consumer: Option<ConsumerTag>,
}

impl Queue {
    fn new(options: QueueOptions) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            options,
            depth: Arc::new(AtomicUsize::new(0)),
            consumer: None,
        }
    }

    fn enqueue(&self, delivery: Delivery) -> Result<(), BusError> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.sender.send(delivery).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            BusError::Closed
        })
    }
}

struct Consumer {
    queue: String,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    consumers: HashMap<ConsumerTag, Consumer>,
    closed: bool,
}

impl BrokerState {
    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    fn remove_queue(&mut self, name: &str) {
        self.queues.remove(name);
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|b| b.queue != name);
        }
    }
}

/// In-memory implementation of [`MessageBus`].
///
/// Suitable for tests and single-process deployments; distributed
/// deployments would put an AMQP client behind the same trait.
pub struct InMemoryMessageBus {
    state: RwLock<BrokerState>,
    messages_published: AtomicU64,
    consumer_seq: AtomicU64,
}

impl InMemoryMessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BrokerState::default()),
            messages_published: AtomicU64::new(0),
            consumer_seq: AtomicU64::new(0),
        }
    }

    /// Total messages accepted by `publish` and `send_to_queue`.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Number of declared queues.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.state.read().queues.len()
    }

    /// Whether a queue with this name exists.
    #[must_use]
    pub fn has_queue(&self, name: &str) -> bool {
        self.state.read().queues.contains_key(name)
    }

    /// Messages waiting in a queue (not yet handed to a consumer).
    #[must_use]
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.state
            .read()
            .queues
            .get(name)
            .map(|q| q.depth.load(Ordering::Relaxed))
    }

    /// Number of active consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.state.read().consumers.len()
    }

    /// Close the bus: stop all consumers, drop all queues, fail further calls.
    pub fn close(&self) {
        let mut state = self.state.write();
        if state.closed {
            return;
        }
        state.closed = true;
        for (tag, consumer) in state.consumers.drain() {
            consumer.task.abort();
            debug!(consumer = %tag, queue = %consumer.queue, "Consumer stopped on close");
        }
        state.queues.clear();
        state.exchanges.clear();
        debug!("In-memory bus closed");
    }

    fn stamp(options: PublishOptions) -> MessageProperties {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        MessageProperties::from_options(options, Uuid::new_v4().to_string(), now_ms)
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryMessageBus {
    fn drop(&mut self) {
        for consumer in self.state.get_mut().consumers.values() {
            consumer.task.abort();
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn assert_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        _options: ExchangeOptions,
    ) -> Result<(), BusError> {
        let mut state = self.state.write();
        state.ensure_open()?;

        if let Some(existing) = state.exchanges.get(name) {
            if existing.kind != kind {
                return Err(BusError::ExchangeKindMismatch {
                    name: name.to_string(),
                    existing: existing.kind,
                    requested: kind,
                });
            }
            return Ok(());
        }

        state.exchanges.insert(
            name.to_string(),
            Exchange {
                kind,
                bindings: Vec::new(),
            },
        );
        debug!(exchange = name, kind = %kind, "Exchange declared");
        Ok(())
    }

    async fn assert_queue(&self, name: &str, options: QueueOptions) -> Result<QueueInfo, BusError> {
        let mut state = self.state.write();
        state.ensure_open()?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        if !state.queues.contains_key(&name) {
            state.queues.insert(name.clone(), Queue::new(options));
            debug!(queue = %name, exclusive = options.exclusive, "Queue declared");
        }

        Ok(QueueInfo { name })
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BusError> {
        let mut state = self.state.write();
        state.ensure_open()?;

        if !state.queues.contains_key(queue) {
            return Err(BusError::QueueNotFound(queue.to_string()));
        }
        let Some(target) = state.exchanges.get_mut(exchange) else {
            return Err(BusError::ExchangeNotFound(exchange.to_string()));
        };

        let already_bound = target
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.routing_key == routing_key);
        if !already_bound {
            target.bindings.push(Binding {
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            });
            debug!(queue, exchange, routing_key, "Queue bound");
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), BusError> {
        if exchange == DEFAULT_EXCHANGE {
            return self.send_to_queue(routing_key, payload, options).await;
        }

        let state = self.state.read();
        state.ensure_open()?;

        let Some(target) = state.exchanges.get(exchange) else {
            return Err(BusError::ExchangeNotFound(exchange.to_string()));
        };

        let properties = Self::stamp(options);
        let routes = target.routes(routing_key);
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        if routes.is_empty() {
            debug!(exchange, routing_key, "Message unroutable, dropped");
            return Ok(());
        }

        for queue_name in &routes {
            let Some(queue) = state.queues.get(queue_name) else {
                continue;
            };
            let delivery = Delivery {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload: payload.clone(),
                properties: properties.clone(),
            };
            if let Err(e) = queue.enqueue(delivery) {
                warn!(queue = %queue_name, error = %e, "Failed to enqueue routed message");
            }
        }

        debug!(exchange, routing_key, queues = routes.len(), "Message published");
        Ok(())
    }

    async fn send_to_queue(
        &self,
        queue: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), BusError> {
        let state = self.state.read();
        state.ensure_open()?;

        let Some(target) = state.queues.get(queue) else {
            return Err(BusError::QueueNotFound(queue.to_string()));
        };

        let delivery = Delivery {
            exchange: DEFAULT_EXCHANGE.to_string(),
            routing_key: queue.to_string(),
            payload,
            properties: Self::stamp(options),
        };
        target.enqueue(delivery)?;
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        debug!(queue, "Message sent to queue");
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ConsumerTag, BusError> {
        let mut state = self.state.write();
        state.ensure_open()?;

        let seq = self.consumer_seq.fetch_add(1, Ordering::Relaxed);
        let tag = ConsumerTag(format!("ctag-{seq}"));

        let Some(target) = state.queues.get_mut(queue) else {
            return Err(BusError::QueueNotFound(queue.to_string()));
        };
        if target.consumer.is_some() {
            return Err(BusError::AlreadyConsumed(queue.to_string()));
        }
        target.consumer = Some(tag.clone());

        let receiver = Arc::clone(&target.receiver);
        let depth = Arc::clone(&target.depth);
        let task = tokio::spawn(async move {
            loop {
                let next = {
                    let mut rx = receiver.lock().await;
                    rx.recv().await
                };
                let Some(delivery) = next else {
                    break;
                };
                depth.fetch_sub(1, Ordering::Relaxed);
                handler.handle(delivery).await;
            }
        });

        state.consumers.insert(
            tag.clone(),
            Consumer {
                queue: queue.to_string(),
                task,
            },
        );
        debug!(queue, consumer = %tag, "Consumer started");
        Ok(tag)
    }

    async fn cancel(&self, tag: &ConsumerTag) -> Result<(), BusError> {
        let mut state = self.state.write();

        let Some(consumer) = state.consumers.remove(tag) else {
            return Err(BusError::ConsumerNotFound(tag.0.clone()));
        };
        consumer.task.abort();

        let auto_delete = match state.queues.get_mut(&consumer.queue) {
            Some(queue) => {
                queue.consumer = None;
                queue.options.auto_delete
            }
            None => false,
        };
        if auto_delete {
            state.remove_queue(&consumer.queue);
            debug!(queue = %consumer.queue, "Auto-delete queue removed");
        }

        debug!(consumer = %tag, "Consumer cancelled");
        Ok(())
    }
}
