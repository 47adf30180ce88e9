//! Record filters for registry queries.

use crate::domain::record::{ServiceRecord, ServiceStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Conjunction of optional predicates. An absent field places no constraint.
///
/// `tags` matches if the record carries any of them; `metadata` matches only
/// if every listed pair is present with an equal value. Empty `tags` or
/// `metadata` count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceFilter {
    pub service_name: Option<String>,
    pub version: Option<String>,
    pub status: Option<ServiceStatus>,
    pub tags: Option<BTreeSet<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl ServiceFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: ServiceStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.get_or_insert_with(BTreeSet::new).insert(tag.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Healthy records, optionally of one service.
    #[must_use]
    pub fn healthy(service_name: Option<&str>) -> Self {
        let filter = Self::new().status(ServiceStatus::Healthy);
        match service_name {
            Some(name) => filter.service_name(name),
            None => filter,
        }
    }

    #[must_use]
    pub fn matches(&self, record: &ServiceRecord) -> bool {
        if let Some(name) = &self.service_name {
            if &record.service_name != name {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if &record.version != version {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(tags) = self.tags.as_ref().filter(|t| !t.is_empty()) {
            if tags.is_disjoint(&record.tags) {
                return false;
            }
        }
        if let Some(metadata) = &self.metadata {
            if !metadata
                .iter()
                .all(|(k, v)| record.metadata.get(k) == Some(v))
            {
                return false;
            }
        }
        true
    }
}
