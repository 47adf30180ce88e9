//! Notifications emitted when the registry table changes.

use crate::domain::record::{ServiceId, ServiceRecord, ServiceStatus};
use serde::Serialize;

/// Why a record left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalReason {
    /// Explicit deregistration (peer event or local shutdown).
    Deregistered,
    /// Swept after exceeding the service timeout.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    /// A previously unseen service.
    Added(ServiceRecord),
    /// Heartbeat or re-registration of a known service, status unchanged.
    Updated(ServiceRecord),
    StatusChanged {
        service_id: ServiceId,
        service_name: String,
        from: ServiceStatus,
        to: ServiceStatus,
    },
    Removed {
        record: ServiceRecord,
        reason: RemovalReason,
    },
}

impl RegistryChange {
    /// Id of the service the change concerns.
    #[must_use]
    pub fn service_id(&self) -> &ServiceId {
        match self {
            Self::Added(record) | Self::Updated(record) => &record.service_id,
            Self::StatusChanged { service_id, .. } => service_id,
            Self::Removed { record, .. } => &record.service_id,
        }
    }
}

/// Counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}
