//! Registry errors.
//!
//! Only lifecycle and caller-triggered broadcasts return these. Background
//! heartbeat and sweep failures are logged, and the query surface never fails.

use crate::domain::ServiceStatus;
use shared_bus::{BusError, CodecError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Exchange, queue or publish failure on the bus.
    #[error("transport error: {0}")]
    Transport(#[from] BusError),

    #[error("registry is already running")]
    AlreadyRunning,

    #[error("registry is not running")]
    NotRunning,

    #[error("invalid discovery config: {0}")]
    InvalidConfig(String),

    /// Only `healthy` and `unhealthy` can be announced.
    #[error("cannot announce status '{0}'")]
    InvalidStatus(ServiceStatus),

    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),
}
