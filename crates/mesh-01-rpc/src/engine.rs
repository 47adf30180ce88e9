//! # RPC Correlation Engine
//!
//! Request/reply over a one-way transport.
//!
//! Flow:
//! 1. First call lazily declares one private reply queue and consumes it
//! 2. `register()` parks a continuation under a fresh correlation ID
//! 3. The request is sent tagged with `reply_to` and `correlation_id`
//! 4. `ReplyHandler` resolves the continuation when the reply arrives,
//!    or the caller's deadline expires it, whichever removes it first

use crate::config::RpcConfig;
use crate::domain::{CallOutcome, CorrelationId, PendingCallTable, PendingStatsSnapshot};
use crate::error::RpcError;
use crate::REMOTE_ERROR_HEADER;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_bus::{
    ConsumerTag, Delivery, MessageBus, MessageHandler, Payload, PublishOptions, QueueOptions,
    CONTENT_TYPE_JSON,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Deadline for this call; the engine default applies when `None`.
    pub timeout: Option<Duration>,
    /// Extra envelope fields. `reply_to` and `correlation_id` are overwritten.
    pub publish: PublishOptions,
}

impl RequestOptions {
    /// Options with only a deadline set.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// The engine's reply destination once established.
struct ReplyChannel {
    queue: String,
    consumer: ConsumerTag,
}

/// Resolves parked calls from messages arriving on the reply queue.
struct ReplyHandler {
    pending: Arc<PendingCallTable>,
}

#[async_trait]
impl MessageHandler for ReplyHandler {
    async fn handle(&self, delivery: Delivery) {
        let Delivery {
            payload,
            properties,
            ..
        } = delivery;

        let Some(raw_id) = properties.correlation_id.as_deref() else {
            self.pending.record_orphan();
            debug!("Reply without correlation ID dropped");
            return;
        };
        let Ok(correlation_id) = CorrelationId::parse(raw_id) else {
            self.pending.record_orphan();
            debug!(correlation_id = raw_id, "Reply with malformed correlation ID dropped");
            return;
        };

        let payload = Payload::decode(payload, properties.content_type.as_deref());
        let outcome: CallOutcome = if properties.header(REMOTE_ERROR_HEADER).is_some() {
            Err(RpcError::Remote {
                message: remote_error_message(payload),
            })
        } else {
            Ok(payload)
        };

        self.pending.complete(correlation_id, outcome);
    }
}

fn remote_error_message(payload: Payload) -> String {
    match payload {
        Payload::Text(text) => text,
        Payload::Json(serde_json::Value::String(text)) => text,
        Payload::Json(value) => value.to_string(),
        Payload::Binary(bytes) => format!("<{} bytes of binary error data>", bytes.len()),
    }
}

/// Removes the call from the table if the caller stops waiting early.
struct PendingGuard {
    pending: Arc<PendingCallTable>,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.abandon(&self.correlation_id);
    }
}

/// Request/reply engine over a [`MessageBus`].
pub struct RpcEngine {
    bus: Arc<dyn MessageBus>,
    pending: Arc<PendingCallTable>,
    reply: OnceCell<ReplyChannel>,
    config: RpcConfig,
    closed: AtomicBool,
}

impl RpcEngine {
    pub fn new(bus: Arc<dyn MessageBus>, config: RpcConfig) -> Self {
        Self {
            bus,
            pending: Arc::new(PendingCallTable::new()),
            reply: OnceCell::new(),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Send `payload` (as JSON) to `queue` and wait for the correlated reply.
    ///
    /// # Errors
    ///
    /// - `RpcError::InvalidDestination` if `queue` is blank
    /// - `RpcError::Transport` if the reply channel or the send fails
    /// - `RpcError::Timeout` if no reply arrives before the deadline
    /// - `RpcError::Remote` if the responder reported a handler failure
    pub async fn request<T>(
        &self,
        queue: &str,
        payload: &T,
        options: RequestOptions,
    ) -> Result<Payload, RpcError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let body = Payload::encode(payload)?;
        self.request_raw(queue, body, CONTENT_TYPE_JSON, options)
            .await
    }

    /// Like [`request`](Self::request), decoding the reply into `R`.
    pub async fn request_as<T, R>(
        &self,
        queue: &str,
        payload: &T,
        options: RequestOptions,
    ) -> Result<R, RpcError>
    where
        T: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let reply = self.request(queue, payload, options).await?;
        Ok(reply.deserialize()?)
    }

    /// Send pre-encoded bytes and wait for the correlated reply.
    pub async fn request_raw(
        &self,
        queue: &str,
        body: Bytes,
        content_type: &str,
        options: RequestOptions,
    ) -> Result<Payload, RpcError> {
        if queue.trim().is_empty() {
            return Err(RpcError::InvalidDestination);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }

        let reply_queue = self.ensure_reply_channel().await?.to_string();
        let timeout = options.timeout.unwrap_or_else(|| self.config.default_timeout());

        let (correlation_id, mut rx) = self.pending.register(queue, timeout);
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            correlation_id,
        };
        // A shutdown that ran between the first check and register() has
        // already swept the table and cancelled the reply consumer.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.abandon(&correlation_id);
            return Err(RpcError::Closed);
        }

        let mut publish = options.publish;
        publish.correlation_id = Some(correlation_id.to_string());
        publish.reply_to = Some(reply_queue);
        if publish.content_type.is_none() {
            publish.content_type = Some(content_type.to_string());
        }

        if let Err(e) = self.bus.send_to_queue(queue, body, publish).await {
            self.pending.discard(&correlation_id);
            warn!(
                correlation_id = %correlation_id,
                queue = queue,
                error = %e,
                "Request send failed"
            );
            return Err(RpcError::Transport(e));
        }

        debug!(correlation_id = %correlation_id, queue = queue, "Sent request");

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::Cancelled),
            Err(_) => {
                if self.pending.expire(&correlation_id) {
                    return Err(RpcError::Timeout {
                        queue: queue.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                // The reply removed the entry first; its outcome is already in flight.
                rx.await.unwrap_or(Err(RpcError::Cancelled))
            }
        }
    }

    /// Fire-and-forget send with no correlation tracking.
    pub async fn emit<T>(
        &self,
        queue: &str,
        payload: &T,
        mut options: PublishOptions,
    ) -> Result<(), RpcError>
    where
        T: Serialize + ?Sized + Sync,
    {
        if queue.trim().is_empty() {
            return Err(RpcError::InvalidDestination);
        }
        let body = Payload::encode(payload)?;
        if options.content_type.is_none() {
            options.content_type = Some(CONTENT_TYPE_JSON.to_string());
        }
        self.bus.send_to_queue(queue, body, options).await?;
        debug!(queue = queue, "Emitted message");
        Ok(())
    }

    /// Declare and consume the shared reply queue exactly once.
    async fn ensure_reply_channel(&self) -> Result<&str, RpcError> {
        let channel = self
            .reply
            .get_or_try_init(|| async {
                let name = self.config.reply_queue.as_deref().unwrap_or("");
                let info = self.bus.assert_queue(name, QueueOptions::private()).await?;
                let handler = Arc::new(ReplyHandler {
                    pending: Arc::clone(&self.pending),
                });
                let consumer = self.bus.consume(&info.name, handler).await?;
                info!(reply_queue = %info.name, "RPC reply channel established");
                Ok::<_, RpcError>(ReplyChannel {
                    queue: info.name,
                    consumer,
                })
            })
            .await?;
        Ok(&channel.queue)
    }

    /// Name of the reply queue, once the first request has set it up.
    #[must_use]
    pub fn reply_queue(&self) -> Option<&str> {
        self.reply.get().map(|c| c.queue.as_str())
    }

    /// Calls currently waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    #[must_use]
    pub fn stats(&self) -> PendingStatsSnapshot {
        self.pending.stats()
    }

    /// Stop consuming replies and fail every parked call with `Cancelled`.
    /// Further requests fail with `Closed`. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(channel) = self.reply.get() {
            if let Err(e) = self.bus.cancel(&channel.consumer).await {
                warn!(reply_queue = %channel.queue, error = %e, "Failed to cancel reply consumer");
            }
        }
        let cancelled = self.pending.cancel_all();
        info!(cancelled = cancelled, "RPC engine shut down");
    }
}
