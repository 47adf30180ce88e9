//! # Mesh Telemetry
//!
//! Logging and metrics shared by mesh services.
//!
//! - Logs: `tracing` with an `EnvFilter`, pretty or JSON `fmt` output
//! - Metrics: Prometheus counters and gauges in a crate-global registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // Your application code here
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MESH_SERVICE_NAME` | `mesh-node` | Service name in logs |
//! | `MESH_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `MESH_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `MESH_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |

mod config;
mod logging;
pub mod metrics;

pub use config::{parse_flag, TelemetryConfig};
pub use logging::init_logging;
pub use metrics::{
    advance_counter, gather_text, register_metrics, BUS_MESSAGES_PUBLISHED, DISCOVERY_SERVICES,
    RPC_ORPHANED_REPLIES, RPC_PENDING_CALLS, RPC_REQUESTS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register metrics and install the global log subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}
