//! Discovery events broadcast between registries.

use crate::domain::record::ServiceRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a [`DiscoveryEvent`] announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryEventKind {
    Registered,
    Heartbeat,
    Deregistered,
    Healthy,
    Unhealthy,
}

impl fmt::Display for DiscoveryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registered => "registered",
            Self::Heartbeat => "heartbeat",
            Self::Deregistered => "deregistered",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Immutable envelope `{type, service, timestamp}`.
///
/// `timestamp` is the sender's clock and is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    #[serde(rename = "type")]
    pub kind: DiscoveryEventKind,
    pub service: ServiceRecord,
    #[serde(default)]
    pub timestamp: u64,
}

impl DiscoveryEvent {
    #[must_use]
    pub fn new(kind: DiscoveryEventKind, service: ServiceRecord, timestamp: u64) -> Self {
        Self {
            kind,
            service,
            timestamp,
        }
    }
}
