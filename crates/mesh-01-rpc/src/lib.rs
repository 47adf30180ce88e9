//! # RPC Correlation Engine (mesh-01)
//!
//! Turns the bus's one-way sends into awaitable request/reply calls.
//!
//! ## Architecture
//!
//! ```text
//!  caller ──request()──▶ RpcEngine ──send(reply_to, correlation_id)──▶ service queue
//!                           │  ▲                                           │
//!              register()   │  │ complete()                                ▼
//!                           ▼  │                                     RpcResponder
//!                    PendingCallTable ◀── ReplyHandler ◀── reply queue ◀───┘
//! ```
//!
//! ## Guarantees
//!
//! - One reply queue per engine, declared on first use
//! - Every call resolves exactly once: reply, timeout, send failure or cancel
//! - Replies are matched by correlation ID only, so arrival order is irrelevant
//! - A reply for an unknown or expired ID is dropped and counted

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_possible_truncation)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod responder;

/// Header marking a reply body as a handler failure message.
pub const REMOTE_ERROR_HEADER: &str = "x-rpc-error";

// Re-exports
pub use config::{ConfigError, RpcConfig, DEFAULT_TIMEOUT_MS};
pub use domain::{CorrelationId, PendingCallTable, PendingStatsSnapshot};
pub use engine::{RequestOptions, RpcEngine};
pub use error::RpcError;
pub use responder::{handler_fn, text_reply, HandlerError, RequestHandler, RpcResponder};
