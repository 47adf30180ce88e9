//! # Message Envelope
//!
//! Transport-level metadata carried alongside every payload. The RPC engine
//! relies on `reply_to` and `correlation_id`; everything else is advisory.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Options supplied by a sender when publishing or sending a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Token echoed back on replies so the requester can match them.
    pub correlation_id: Option<String>,
    /// Queue the receiver should send its reply to.
    pub reply_to: Option<String>,
    /// MIME type of the payload (e.g. `application/json`).
    pub content_type: Option<String>,
    /// Free-form application headers.
    pub headers: HashMap<String, String>,
    /// Ask the broker to persist the message (advisory for in-memory brokers).
    pub persistent: bool,
}

impl PublishOptions {
    /// Options with only a content type set.
    #[must_use]
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    /// Set the correlation id.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the reply destination.
    #[must_use]
    pub fn reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    /// Add a single header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Metadata as observed by the receiver of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
    /// Broker-assigned unique id.
    pub message_id: Option<String>,
    /// Broker acceptance time, milliseconds since the Unix epoch.
    pub timestamp_ms: Option<u64>,
    pub headers: HashMap<String, String>,
}

impl MessageProperties {
    /// Build delivered properties from the sender's options.
    #[must_use]
    pub fn from_options(options: PublishOptions, message_id: String, timestamp_ms: u64) -> Self {
        Self {
            correlation_id: options.correlation_id,
            reply_to: options.reply_to,
            content_type: options.content_type,
            message_id: Some(message_id),
            timestamp_ms: Some(timestamp_ms),
            headers: options.headers,
        }
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Exchange the message was published to (empty for direct queue sends).
    pub exchange: String,
    /// Routing key used when publishing (the queue name for direct sends).
    pub routing_key: String,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Envelope metadata.
    pub properties: MessageProperties,
}

impl Delivery {
    /// Correlation id, if the sender set one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    /// Reply destination, if the sender set one.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to.as_deref()
    }
}
