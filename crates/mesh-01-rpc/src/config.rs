//! RPC engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid reply queue: {0}")]
    InvalidReplyQueue(String),
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Deadline applied when a request does not set its own.
    pub default_timeout_ms: u64,
    /// Fixed reply queue name. `None` lets the broker generate a private one.
    pub reply_queue: Option<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            reply_queue: None,
        }
    }
}

impl RpcConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout_ms cannot be 0".into(),
            ));
        }
        if matches!(&self.reply_queue, Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::InvalidReplyQueue(
                "reply_queue cannot be blank; omit it for a generated name".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
