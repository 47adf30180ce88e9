//! # Message Bus Port
//!
//! The interface the RPC engine and the discovery registry consume. Any
//! broker (AMQP, in-memory, ...) can sit behind it.

use crate::envelope::{Delivery, PublishOptions};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus was closed.
    #[error("message bus closed")]
    Closed,

    #[error("exchange '{0}' not found")]
    ExchangeNotFound(String),

    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    /// Exchange re-declared with a different kind.
    #[error("exchange '{name}' already declared as {existing}, requested {requested}")]
    ExchangeKindMismatch {
        name: String,
        existing: ExchangeKind,
        requested: ExchangeKind,
    },

    /// The queue already has a consumer.
    #[error("queue '{0}' already has a consumer")]
    AlreadyConsumed(String),

    #[error("consumer '{0}' not found")]
    ConsumerNotFound(String),

    /// Broker-specific failure.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Exact routing key match.
    Direct,
    /// Wildcard pattern match (`*`, `#`).
    Topic,
    /// Every bound queue receives every message.
    Fanout,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Topic => write!(f, "topic"),
            Self::Fanout => write!(f, "fanout"),
        }
    }
}

/// Options for declaring an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

/// Options for declaring a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    /// Only usable by the declaring connection.
    pub exclusive: bool,
    /// Deleted when its consumer is cancelled.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Private, auto-cleaned queue (reply queues, discovery subscriptions).
    #[must_use]
    pub fn private() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Result of a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Actual queue name (broker-generated when an empty name was requested).
    pub name: String,
}

/// Handle identifying an active consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTag(pub String);

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback invoked once per inbound message.
///
/// Handlers must not panic on malformed input; the bus owns acknowledgement.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery);
}

/// Publish/subscribe transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declare an exchange. Idempotent for the same kind.
    async fn assert_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<(), BusError>;

    /// Declare a queue. An empty name asks the broker to generate one.
    async fn assert_queue(&self, name: &str, options: QueueOptions) -> Result<QueueInfo, BusError>;

    /// Bind a queue to an exchange with a routing key or pattern. Idempotent.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> Result<(), BusError>;

    /// Publish to an exchange.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), BusError>;

    /// Send directly to a named queue.
    async fn send_to_queue(
        &self,
        queue: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), BusError>;

    /// Start delivering messages from `queue` to `handler`.
    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ConsumerTag, BusError>;

    /// Stop a consumer. Auto-delete queues are removed with it.
    async fn cancel(&self, tag: &ConsumerTag) -> Result<(), BusError>;
}
