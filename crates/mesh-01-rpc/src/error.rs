//! RPC error taxonomy.
//!
//! `Timeout` and `Transport` are kept distinct so callers can tell
//! "no answer" apart from "could not reach the bus".

use shared_bus::{BusError, CodecError};
use thiserror::Error;

/// Errors surfaced by a single RPC call. They never affect other pending calls.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("destination queue must not be empty")]
    InvalidDestination,

    /// The bus rejected the send or the reply channel setup.
    #[error("transport error: {0}")]
    Transport(#[from] BusError),

    /// No reply within the deadline.
    #[error("request to '{queue}' timed out after {timeout_ms}ms")]
    Timeout { queue: String, timeout_ms: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    /// The responder's handler reported a failure.
    #[error("remote handler failed: {message}")]
    Remote { message: String },

    /// The call was dropped before a reply arrived (engine shut down).
    #[error("request cancelled before a reply arrived")]
    Cancelled,

    #[error("rpc engine is shut down")]
    Closed,
}

impl RpcError {
    /// True for deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
