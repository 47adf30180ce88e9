//! # Shared Bus - Message Bus Collaborator
//!
//! The publish/subscribe transport both mesh components are built on.
//!
//! ## Topology
//!
//! ```text
//!  publish(exchange, key)          send_to_queue(queue)
//!          │                               │
//!          ▼                               │
//!   ┌──────────────┐   bind(pattern)       ▼
//!   │   Exchange   │ ──────────────▶ ┌──────────┐  consume()  ┌─────────┐
//!   │ direct/topic │                 │  Queue   │ ──────────▶ │ Handler │
//!   │   /fanout    │                 └──────────┘             └─────────┘
//!   └──────────────┘
//! ```
//!
//! ## Contents
//!
//! - [`MessageBus`] / [`MessageHandler`]: the port consumed by the RPC engine
//!   and the discovery registry
//! - [`Delivery`], [`PublishOptions`]: envelope carrying `reply_to` and
//!   `correlation_id`
//! - [`Payload`]: JSON codec degrading to text and raw bytes
//! - [`InMemoryMessageBus`]: single-process broker

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod codec;
pub mod envelope;
pub mod memory;
pub mod port;
pub mod topic;

// Re-export main types
pub use codec::{CodecError, Payload, CONTENT_TYPE_BINARY, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT};
pub use envelope::{Delivery, MessageProperties, PublishOptions};
pub use memory::{InMemoryMessageBus, DEFAULT_EXCHANGE};
pub use port::{
    BusError, ConsumerTag, ExchangeKind, ExchangeOptions, MessageBus, MessageHandler, QueueInfo,
    QueueOptions,
};
pub use topic::topic_matches;
