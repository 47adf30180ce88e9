//! Responder side of request/reply.
//!
//! Consumes a service queue, runs a handler per request and sends the result
//! to the request's `reply_to` with the same `correlation_id`. Handler
//! failures go back as text marked with [`REMOTE_ERROR_HEADER`].

use crate::REMOTE_ERROR_HEADER;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{
    ConsumerTag, Delivery, MessageBus, MessageHandler, Payload, PublishOptions, QueueOptions,
};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Failure reported by a request handler; its message is sent to the caller.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<shared_bus::CodecError> for HandlerError {
    fn from(e: shared_bus::CodecError) -> Self {
        Self(format!("invalid request payload: {e}"))
    }
}

/// Serves requests arriving on one queue.
///
/// `Ok(None)` means "no reply" (the request was a one-way message).
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Payload) -> Result<Option<Payload>, HandlerError>;
}

/// Adapter turning an async closure into a [`RequestHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Payload>, HandlerError>> + Send,
{
    FnHandler {
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F, Fut>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Payload>, HandlerError>> + Send,
{
    async fn handle(&self, request: Payload) -> Result<Option<Payload>, HandlerError> {
        (self.f)(request).await
    }
}

/// Bus-facing side of one served queue.
struct RequestDispatcher {
    bus: Arc<dyn MessageBus>,
    queue: String,
    handler: Arc<dyn RequestHandler>,
}

impl RequestDispatcher {
    async fn send_reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        body: Payload,
        is_error: bool,
    ) {
        let (bytes, content_type) = match body.to_wire() {
            Ok(wire) => wire,
            Err(e) => {
                error!(queue = %self.queue, error = %e, "Failed to encode reply");
                return;
            }
        };

        let mut opts = PublishOptions::with_content_type(content_type);
        if let Some(id) = correlation_id {
            opts = opts.correlation_id(id);
        }
        if is_error {
            opts = opts.header(REMOTE_ERROR_HEADER, "true");
        }

        if let Err(e) = self.bus.send_to_queue(reply_to, bytes, opts).await {
            warn!(
                queue = %self.queue,
                reply_to = reply_to,
                error = %e,
                "Failed to send reply"
            );
        }
    }
}

#[async_trait]
impl MessageHandler for RequestDispatcher {
    async fn handle(&self, delivery: Delivery) {
        let request = Payload::decode(
            delivery.payload.clone(),
            delivery.properties.content_type.as_deref(),
        );
        let outcome = self.handler.handle(request).await;

        let Some(reply_to) = delivery.reply_to() else {
            if let Err(e) = outcome {
                warn!(queue = %self.queue, error = %e, "One-way request handler failed");
            }
            return;
        };
        let correlation_id = delivery.correlation_id();

        match outcome {
            Ok(Some(reply)) => {
                self.send_reply(reply_to, correlation_id, reply, false).await;
                debug!(queue = %self.queue, reply_to = reply_to, "Replied to request");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "Request handler failed");
                self.send_reply(reply_to, correlation_id, Payload::Text(e.0), true)
                    .await;
            }
        }
    }
}

/// Serves handlers on named queues until stopped.
pub struct RpcResponder {
    bus: Arc<dyn MessageBus>,
    consumers: Mutex<Vec<(String, ConsumerTag)>>,
}

impl RpcResponder {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Declare `queue` and start serving it with `handler`.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the queue cannot be declared or consumed.
    pub async fn serve(
        &self,
        queue: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), shared_bus::BusError> {
        self.bus
            .assert_queue(
                queue,
                QueueOptions {
                    durable: false,
                    exclusive: false,
                    auto_delete: true,
                },
            )
            .await?;
        let dispatcher = Arc::new(RequestDispatcher {
            bus: Arc::clone(&self.bus),
            queue: queue.to_string(),
            handler,
        });
        let tag = self.bus.consume(queue, dispatcher).await?;
        self.consumers.lock().push((queue.to_string(), tag));
        info!(queue = queue, "Serving requests");
        Ok(())
    }

    /// Queues currently being served.
    #[must_use]
    pub fn queues(&self) -> Vec<String> {
        self.consumers.lock().iter().map(|(q, _)| q.clone()).collect()
    }

    /// Stop every consumer started by [`serve`](Self::serve).
    pub async fn stop(&self) {
        let consumers = std::mem::take(&mut *self.consumers.lock());
        for (queue, tag) in consumers {
            if let Err(e) = self.bus.cancel(&tag).await {
                warn!(queue = %queue, error = %e, "Failed to stop serving queue");
            }
        }
    }
}

/// Plain-text reply, used for error bodies and simple services.
#[must_use]
pub fn text_reply(text: impl Into<String>) -> Payload {
    Payload::Text(text.into())
}
