//! # Node Configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables, then validated.
//!
//! ```toml
//! metrics_interval_ms = 15000
//!
//! [rpc]
//! default_timeout_ms = 5000
//!
//! [discovery]
//! enabled = true
//! service_name = "orders"
//! port = 4000
//! tags = ["eu-west"]
//! ```

use mesh_01_rpc::RpcConfig;
use mesh_02_discovery::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "MESH_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// RPC engine configuration.
    pub rpc: RpcConfig,
    /// Liveness registry configuration.
    pub discovery: DiscoveryConfig,
    /// How often engine and registry stats are copied into metrics.
    pub metrics_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            discovery: DiscoveryConfig::default(),
            metrics_interval_ms: 15_000,
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// File named by `MESH_CONFIG` (or defaults), environment overrides,
    /// then validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    ///
    /// # Environment Variables
    ///
    /// - `MESH_SERVICE_NAME`, `MESH_HOST`, `MESH_PORT`
    /// - `MESH_DISCOVERY_ENABLED`: true/false
    /// - `MESH_HEARTBEAT_MS`, `MESH_SERVICE_TIMEOUT_MS`
    /// - `MESH_RPC_TIMEOUT_MS`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("MESH_SERVICE_NAME") {
            self.discovery.service_name = name;
        }
        if let Some(host) = lookup("MESH_HOST") {
            self.discovery.host = host;
        }
        if let Some(port) = parse_env(&lookup, "MESH_PORT")? {
            self.discovery.port = port;
        }
        if let Some(value) = lookup("MESH_DISCOVERY_ENABLED") {
            self.discovery.enabled =
                mesh_telemetry::parse_flag(&value).ok_or(ConfigError::InvalidEnv {
                    var: "MESH_DISCOVERY_ENABLED",
                    value,
                })?;
        }
        if let Some(ms) = parse_env(&lookup, "MESH_HEARTBEAT_MS")? {
            self.discovery.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = parse_env(&lookup, "MESH_SERVICE_TIMEOUT_MS")? {
            self.discovery.service_timeout_ms = ms;
        }
        if let Some(ms) = parse_env(&lookup, "MESH_RPC_TIMEOUT_MS")? {
            self.rpc.default_timeout_ms = ms;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.discovery
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.metrics_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "metrics_interval_ms cannot be 0".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    /// Queue the built-in echo responder serves.
    #[must_use]
    pub fn ping_queue(&self) -> String {
        format!("{}.ping", self.discovery.service_name)
    }
}

fn parse_env<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        None => Ok(None),
    }
}
