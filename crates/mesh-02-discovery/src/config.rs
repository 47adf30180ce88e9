//! Discovery configuration with validation.
//!
//! Every field is optional when deserializing; omitted fields take the
//! defaults below.

use crate::domain::{DiscoveryEventKind, ServiceId, ServiceRecord, ServiceStatus};
use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default heartbeat period (30 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Default age after which a silent peer is evicted (90 seconds).
pub const DEFAULT_SERVICE_TIMEOUT_MS: u64 = 90_000;

/// Upper bound for heartbeat and sweep periods (one day).
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Default topic exchange all registries share.
pub const DEFAULT_DISCOVERY_EXCHANGE: &str = "service.discovery";

/// Routing-key prefix per event type. The published key is `<prefix>.<serviceName>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingKeys {
    pub registered: String,
    pub heartbeat: String,
    pub deregistered: String,
    pub healthy: String,
    pub unhealthy: String,
}

impl Default for RoutingKeys {
    fn default() -> Self {
        Self {
            registered: "service.registered".into(),
            heartbeat: "service.heartbeat".into(),
            deregistered: "service.deregistered".into(),
            healthy: "service.healthy".into(),
            unhealthy: "service.unhealthy".into(),
        }
    }
}

impl RoutingKeys {
    /// Prefix configured for an event type.
    #[must_use]
    pub fn prefix(&self, kind: DiscoveryEventKind) -> &str {
        match kind {
            DiscoveryEventKind::Registered => &self.registered,
            DiscoveryEventKind::Heartbeat => &self.heartbeat,
            DiscoveryEventKind::Deregistered => &self.deregistered,
            DiscoveryEventKind::Healthy => &self.healthy,
            DiscoveryEventKind::Unhealthy => &self.unhealthy,
        }
    }

    /// Full routing key for an event about `service_name`.
    #[must_use]
    pub fn routing_key(&self, kind: DiscoveryEventKind, service_name: &str) -> String {
        format!("{}.{}", self.prefix(kind), service_name)
    }
}

/// Liveness registry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// When false, `start()` does nothing.
    pub enabled: bool,
    pub service_name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub health_check_endpoint: Option<String>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub heartbeat_interval_ms: u64,
    pub service_timeout_ms: u64,
    /// Sweep period; `None` means twice the heartbeat interval.
    pub sweep_interval_ms: Option<u64>,
    pub discovery_exchange: String,
    pub routing_keys: RoutingKeys,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "unknown-service".into(),
            version: "1.0.0".into(),
            host: "localhost".into(),
            port: 0,
            health_check_endpoint: None,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            service_timeout_ms: DEFAULT_SERVICE_TIMEOUT_MS,
            sweep_interval_ms: None,
            discovery_exchange: DEFAULT_DISCOVERY_EXCHANGE.into(),
            routing_keys: RoutingKeys::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Enabled config for `service_name` with every other field defaulted.
    #[must_use]
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.service_name.trim().is_empty() {
            return Err(RegistryError::InvalidConfig(
                "service_name must not be empty".into(),
            ));
        }
        if self.discovery_exchange.trim().is_empty() {
            return Err(RegistryError::InvalidConfig(
                "discovery_exchange must not be empty".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(RegistryError::InvalidConfig(
                "heartbeat_interval_ms cannot be 0".into(),
            ));
        }
        if self.heartbeat_interval_ms > MAX_INTERVAL_MS {
            return Err(RegistryError::InvalidConfig(format!(
                "heartbeat_interval_ms cannot exceed {MAX_INTERVAL_MS}"
            )));
        }
        if self.sweep_interval_ms.is_some_and(|ms| ms > MAX_INTERVAL_MS) {
            return Err(RegistryError::InvalidConfig(format!(
                "sweep_interval_ms cannot exceed {MAX_INTERVAL_MS}"
            )));
        }
        if self.sweep_interval_ms == Some(0) {
            return Err(RegistryError::InvalidConfig(
                "sweep_interval_ms cannot be 0".into(),
            ));
        }
        if self.service_timeout_ms <= self.heartbeat_interval_ms {
            return Err(RegistryError::InvalidConfig(format!(
                "service_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.service_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(
            self.sweep_interval_ms
                .unwrap_or(self.heartbeat_interval_ms.saturating_mul(2)),
        )
    }

    #[must_use]
    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    /// This process's own record as first announced.
    #[must_use]
    pub fn self_record(&self, service_id: ServiceId, now_ms: u64) -> ServiceRecord {
        ServiceRecord {
            service_id,
            service_name: self.service_name.clone(),
            version: self.version.clone(),
            host: self.host.clone(),
            port: self.port,
            health_check_endpoint: self.health_check_endpoint.clone(),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            status: ServiceStatus::Healthy,
            registered_at: now_ms,
            last_heartbeat: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiscoveryConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.service_timeout(), Duration::from_secs(90));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.discovery_exchange, "service.discovery");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DiscoveryConfig = serde_json::from_str(
            r#"{"enabled": true, "service_name": "orders", "port": 4000, "tags": ["eu"]}"#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.service_name, "orders");
        assert_eq!(config.port, 4000);
        assert!(config.tags.contains("eu"));
        assert_eq!(config.host, "localhost");
        assert_eq!(config.routing_keys, RoutingKeys::default());
    }

    #[test]
    fn test_oversized_intervals_rejected() {
        let config = DiscoveryConfig {
            heartbeat_interval_ms: u64::MAX / 2,
            service_timeout_ms: u64::MAX,
            ..DiscoveryConfig::for_service("orders")
        };
        assert!(matches!(config.validate(), Err(RegistryError::InvalidConfig(_))));

        let config = DiscoveryConfig {
            sweep_interval_ms: Some(u64::MAX),
            ..DiscoveryConfig::for_service("orders")
        };
        assert!(matches!(config.validate(), Err(RegistryError::InvalidConfig(_))));

        let config = DiscoveryConfig {
            heartbeat_interval_ms: MAX_INTERVAL_MS,
            service_timeout_ms: MAX_INTERVAL_MS * 3,
            ..DiscoveryConfig::for_service("orders")
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_sweep_interval() {
        let config = DiscoveryConfig {
            sweep_interval_ms: Some(5_000),
            ..DiscoveryConfig::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let empty_name = DiscoveryConfig {
            service_name: " ".into(),
            ..DiscoveryConfig::default()
        };
        assert!(matches!(
            empty_name.validate(),
            Err(RegistryError::InvalidConfig(_))
        ));

        let zero_heartbeat = DiscoveryConfig {
            heartbeat_interval_ms: 0,
            ..DiscoveryConfig::default()
        };
        assert!(zero_heartbeat.validate().is_err());

        let timeout_too_short = DiscoveryConfig {
            heartbeat_interval_ms: 30_000,
            service_timeout_ms: 30_000,
            ..DiscoveryConfig::default()
        };
        assert!(timeout_too_short.validate().is_err());

        let zero_sweep = DiscoveryConfig {
            sweep_interval_ms: Some(0),
            ..DiscoveryConfig::default()
        };
        assert!(zero_sweep.validate().is_err());
    }

    #[test]
    fn test_routing_key_per_event() {
        let keys = RoutingKeys::default();
        assert_eq!(
            keys.routing_key(DiscoveryEventKind::Heartbeat, "orders"),
            "service.heartbeat.orders"
        );
        assert_eq!(
            keys.routing_key(DiscoveryEventKind::Deregistered, "billing"),
            "service.deregistered.billing"
        );
    }

    #[test]
    fn test_self_record_is_healthy() {
        let config = DiscoveryConfig::for_service("orders");
        let record = config.self_record(ServiceId::new("me"), 1_000);
        assert_eq!(record.status, ServiceStatus::Healthy);
        assert_eq!(record.registered_at, 1_000);
        assert_eq!(record.last_heartbeat, 1_000);
        assert_eq!(record.service_name, "orders");
    }
}
