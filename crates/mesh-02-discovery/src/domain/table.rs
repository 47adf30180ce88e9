//! Registry table: one record per service id, including this process.
//!
//! Pure state. Every mutation takes the current time explicitly so the
//! heartbeat and sweep rules can be driven deterministically.
//!
//! Status transitions for peers:
//!
//! ```text
//!  (absent) ──registered/heartbeat──▶ healthy ◀──heartbeat── unhealthy
//!                                       │                       ▲
//!                                       └── age > timeout/2 ────┘
//!  any ──deregistered──▶ (absent)       any ── age > timeout ──▶ (absent)
//! ```

use crate::domain::change::{RegistryChange, RegistryStats, RemovalReason};
use crate::domain::event::{DiscoveryEvent, DiscoveryEventKind};
use crate::domain::filter::ServiceFilter;
use crate::domain::record::{ServiceId, ServiceRecord, ServiceStatus};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

pub struct ServiceTable {
    self_id: ServiceId,
    records: BTreeMap<ServiceId, ServiceRecord>,
}

impl ServiceTable {
    #[must_use]
    pub fn new(self_id: ServiceId) -> Self {
        Self {
            self_id,
            records: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn self_id(&self) -> &ServiceId {
        &self.self_id
    }

    /// Insert (or replace) this process's own record.
    pub fn insert_self(&mut self, mut record: ServiceRecord) -> RegistryChange {
        record.service_id = self.self_id.clone();
        self.records.insert(self.self_id.clone(), record.clone());
        RegistryChange::Added(record)
    }

    pub fn remove_self(&mut self) -> Option<ServiceRecord> {
        self.records.remove(&self.self_id)
    }

    #[must_use]
    pub fn self_record(&self) -> Option<&ServiceRecord> {
        self.records.get(&self.self_id)
    }

    /// Refresh self's heartbeat time and return the record to broadcast.
    pub fn touch_self(&mut self, now_ms: u64) -> Option<ServiceRecord> {
        let record = self.records.get_mut(&self.self_id)?;
        record.last_heartbeat = record.last_heartbeat.max(now_ms);
        Some(record.clone())
    }

    /// Set self's status. Returns the change if the status differed.
    pub fn set_self_status(&mut self, status: ServiceStatus) -> Option<RegistryChange> {
        let record = self.records.get_mut(&self.self_id)?;
        set_status(record, status)
    }

    /// Apply a peer's event at local time `now_ms`.
    ///
    /// Events about this process are ignored. Returns the resulting change,
    /// or `None` if the table was not affected.
    pub fn apply(&mut self, event: &DiscoveryEvent, now_ms: u64) -> Option<RegistryChange> {
        let service_id = &event.service.service_id;
        if *service_id == self.self_id {
            return None;
        }

        match event.kind {
            DiscoveryEventKind::Registered | DiscoveryEventKind::Heartbeat => {
                Some(self.upsert(&event.service, now_ms))
            }
            DiscoveryEventKind::Deregistered => {
                self.records
                    .remove(service_id)
                    .map(|record| RegistryChange::Removed {
                        record,
                        reason: RemovalReason::Deregistered,
                    })
            }
            DiscoveryEventKind::Healthy => self
                .records
                .get_mut(service_id)
                .and_then(|record| set_status(record, ServiceStatus::Healthy)),
            DiscoveryEventKind::Unhealthy => self
                .records
                .get_mut(service_id)
                .and_then(|record| set_status(record, ServiceStatus::Unhealthy)),
        }
    }

    /// Registration and heartbeat: insert if unseen, else refresh in place.
    fn upsert(&mut self, announced: &ServiceRecord, now_ms: u64) -> RegistryChange {
        match self.records.get_mut(&announced.service_id) {
            Some(existing) => {
                let previous = existing.status;
                let mut updated = announced.clone();
                updated.registered_at = existing.registered_at;
                updated.last_heartbeat = existing.last_heartbeat.max(now_ms);
                updated.status = ServiceStatus::Healthy;
                *existing = updated;

                if previous == ServiceStatus::Healthy {
                    RegistryChange::Updated(existing.clone())
                } else {
                    RegistryChange::StatusChanged {
                        service_id: existing.service_id.clone(),
                        service_name: existing.service_name.clone(),
                        from: previous,
                        to: ServiceStatus::Healthy,
                    }
                }
            }
            None => {
                let mut record = announced.clone();
                record.status = ServiceStatus::Healthy;
                record.last_heartbeat = now_ms;
                if record.registered_at == 0 {
                    record.registered_at = now_ms;
                }
                self.records
                    .insert(record.service_id.clone(), record.clone());
                RegistryChange::Added(record)
            }
        }
    }

    /// Demote peers silent for more than half the timeout and evict those
    /// silent for more than the full timeout. Self is never touched.
    pub fn sweep(&mut self, now_ms: u64, service_timeout_ms: u64) -> Vec<RegistryChange> {
        let unhealthy_after = service_timeout_ms / 2;
        let mut changes = Vec::new();

        let expired: Vec<ServiceId> = self
            .records
            .values()
            .filter(|r| r.service_id != self.self_id && r.age_ms(now_ms) > service_timeout_ms)
            .map(|r| r.service_id.clone())
            .collect();
        for id in expired {
            if let Some(record) = self.records.remove(&id) {
                changes.push(RegistryChange::Removed {
                    record,
                    reason: RemovalReason::Expired,
                });
            }
        }

        for record in self.records.values_mut() {
            if record.service_id == self.self_id {
                continue;
            }
            if record.status == ServiceStatus::Healthy && record.age_ms(now_ms) > unhealthy_after {
                if let Some(change) = set_status(record, ServiceStatus::Unhealthy) {
                    changes.push(change);
                }
            }
        }

        changes
    }

    /// Drop every record, self included.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn all(&self) -> Vec<ServiceRecord> {
        self.records.values().cloned().collect()
    }

    #[must_use]
    pub fn filter(&self, filter: &ServiceFilter) -> Vec<ServiceRecord> {
        self.records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, service_id: &str) -> Option<&ServiceRecord> {
        self.records.get(service_id)
    }

    /// Records of `service_name`, or all records when `None`.
    #[must_use]
    pub fn count(&self, service_name: Option<&str>) -> usize {
        match service_name {
            Some(name) => self
                .records
                .values()
                .filter(|r| r.service_name == name)
                .count(),
            None => self.records.len(),
        }
    }

    /// Whether any instance of `service_name` is known, whatever its status.
    #[must_use]
    pub fn exists(&self, service_name: &str) -> bool {
        self.records.values().any(|r| r.service_name == service_name)
    }

    /// Uniform pick among the healthy instances of `service_name`.
    pub fn random_healthy<R: Rng + ?Sized>(
        &self,
        service_name: &str,
        rng: &mut R,
    ) -> Option<ServiceRecord> {
        let healthy: Vec<&ServiceRecord> = self
            .records
            .values()
            .filter(|r| r.is_healthy() && r.service_name == service_name)
            .collect();
        healthy.choose(rng).map(|r| (*r).clone())
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total: self.records.len(),
            ..RegistryStats::default()
        };
        for record in self.records.values() {
            match record.status {
                ServiceStatus::Healthy => stats.healthy += 1,
                ServiceStatus::Unhealthy => stats.unhealthy += 1,
                ServiceStatus::Unknown => stats.unknown += 1,
            }
        }
        stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn set_status(record: &mut ServiceRecord, status: ServiceStatus) -> Option<RegistryChange> {
    if record.status == status {
        return None;
    }
    let from = record.status;
    record.status = status;
    Some(RegistryChange::StatusChanged {
        service_id: record.service_id.clone(),
        service_name: record.service_name.clone(),
        from,
        to: status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    const TIMEOUT: u64 = 90_000;

    fn peer(id: &str, name: &str) -> ServiceRecord {
        ServiceRecord {
            service_id: ServiceId::new(id),
            service_name: name.into(),
            version: "1.0.0".into(),
            host: "localhost".into(),
            port: 4000,
            health_check_endpoint: None,
            tags: Default::default(),
            metadata: Default::default(),
            status: ServiceStatus::Unknown,
            registered_at: 0,
            last_heartbeat: 0,
        }
    }

    fn event(kind: DiscoveryEventKind, id: &str, name: &str) -> DiscoveryEvent {
        DiscoveryEvent::new(kind, peer(id, name), 0)
    }

    fn table_with_self() -> ServiceTable {
        let mut table = ServiceTable::new(ServiceId::new("me"));
        let mut me = peer("me", "orders");
        me.status = ServiceStatus::Healthy;
        table.insert_self(me);
        table
    }

    #[test]
    fn test_registered_inserts_healthy() {
        let mut table = table_with_self();
        let change = table.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 1_000);

        assert!(matches!(change, Some(RegistryChange::Added(_))));
        let record = table.get("p1").unwrap();
        assert_eq!(record.status, ServiceStatus::Healthy);
        assert_eq!(record.last_heartbeat, 1_000);
        assert_eq!(record.registered_at, 1_000);
    }

    #[test]
    fn test_heartbeat_for_unknown_equals_registration() {
        let mut via_register = table_with_self();
        let mut via_heartbeat = table_with_self();

        via_register.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 5_000);
        via_heartbeat.apply(&event(DiscoveryEventKind::Heartbeat, "p1", "orders"), 5_000);

        assert_eq!(via_register.all(), via_heartbeat.all());
    }

    #[test]
    fn test_own_events_are_ignored() {
        let mut table = table_with_self();
        let before = table.all();

        assert!(table
            .apply(&event(DiscoveryEventKind::Deregistered, "me", "orders"), 1)
            .is_none());
        assert!(table
            .apply(&event(DiscoveryEventKind::Unhealthy, "me", "orders"), 1)
            .is_none());
        assert_eq!(table.all(), before);
    }

    #[test]
    fn test_deregistration_is_idempotent() {
        let mut table = table_with_self();
        table.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 0);

        let first = table.apply(&event(DiscoveryEventKind::Deregistered, "p1", "orders"), 1);
        assert!(matches!(
            first,
            Some(RegistryChange::Removed { reason: RemovalReason::Deregistered, .. })
        ));
        assert!(table
            .apply(&event(DiscoveryEventKind::Deregistered, "p1", "orders"), 2)
            .is_none());
        assert!(table.get("p1").is_none());
    }

    #[test]
    fn test_last_heartbeat_never_decreases() {
        let mut table = table_with_self();
        table.apply(&event(DiscoveryEventKind::Heartbeat, "p1", "orders"), 10_000);
        table.apply(&event(DiscoveryEventKind::Heartbeat, "p1", "orders"), 4_000);

        assert_eq!(table.get("p1").unwrap().last_heartbeat, 10_000);
    }

    #[test]
    fn test_heartbeat_keeps_registration_time() {
        let mut table = table_with_self();
        table.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 1_000);
        table.apply(&event(DiscoveryEventKind::Heartbeat, "p1", "orders"), 31_000);

        let record = table.get("p1").unwrap();
        assert_eq!(record.registered_at, 1_000);
        assert_eq!(record.last_heartbeat, 31_000);
    }

    #[test]
    fn test_sweep_demotes_then_evicts() {
        let mut table = table_with_self();
        table.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 0);

        // exactly half the timeout: still healthy
        assert!(table.sweep(45_000, TIMEOUT).is_empty());

        let changes = table.sweep(45_001, TIMEOUT);
        assert_eq!(changes.len(), 1);
        assert!(matches!(
            &changes[0],
            RegistryChange::StatusChanged { from: ServiceStatus::Healthy, to: ServiceStatus::Unhealthy, .. }
        ));
        assert_eq!(table.get("p1").unwrap().status, ServiceStatus::Unhealthy);

        // unhealthy and under the timeout: left alone
        assert!(table.sweep(90_000, TIMEOUT).is_empty());
        assert!(table.get("p1").is_some());

        let changes = table.sweep(90_001, TIMEOUT);
        assert!(matches!(
            &changes[0],
            RegistryChange::Removed { reason: RemovalReason::Expired, .. }
        ));
        assert!(table.get("p1").is_none());
    }

    #[test]
    fn test_sweep_evicts_healthy_record_past_timeout_directly() {
        let mut table = table_with_self();
        table.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 0);

        let changes = table.sweep(200_000, TIMEOUT);
        assert_eq!(changes.len(), 1);
        assert!(table.get("p1").is_none());
    }

    #[test]
    fn test_heartbeat_revives_unhealthy_record() {
        let mut table = table_with_self();
        table.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 0);
        table.sweep(50_000, TIMEOUT);

        let change = table.apply(&event(DiscoveryEventKind::Heartbeat, "p1", "orders"), 60_000);
        assert!(matches!(
            change,
            Some(RegistryChange::StatusChanged { to: ServiceStatus::Healthy, .. })
        ));
        assert!(table.sweep(100_000, TIMEOUT).is_empty());
    }

    #[test]
    fn test_self_is_never_swept() {
        let mut table = table_with_self();
        assert!(table.sweep(u64::MAX, TIMEOUT).is_empty());
        assert_eq!(table.self_record().unwrap().status, ServiceStatus::Healthy);
    }

    #[test]
    fn test_status_events_only_touch_known_records() {
        let mut table = table_with_self();
        assert!(table
            .apply(&event(DiscoveryEventKind::Unhealthy, "ghost", "orders"), 0)
            .is_none());
        assert!(table.get("ghost").is_none());

        table.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 0);
        table.apply(&event(DiscoveryEventKind::Unhealthy, "p1", "orders"), 7_000);
        let record = table.get("p1").unwrap();
        assert_eq!(record.status, ServiceStatus::Unhealthy);
        // status events are not heartbeats
        assert_eq!(record.last_heartbeat, 0);

        table.apply(&event(DiscoveryEventKind::Healthy, "p1", "orders"), 8_000);
        assert_eq!(table.get("p1").unwrap().status, ServiceStatus::Healthy);
    }

    #[test]
    fn test_queries() {
        let mut table = table_with_self();
        table.apply(&event(DiscoveryEventKind::Registered, "p1", "orders"), 0);
        table.apply(&event(DiscoveryEventKind::Registered, "b1", "billing"), 0);
        table.apply(&event(DiscoveryEventKind::Unhealthy, "b1", "billing"), 0);

        assert_eq!(table.count(None), 3);
        assert_eq!(table.count(Some("orders")), 2);
        assert!(table.exists("billing"));
        assert!(!table.exists("shipping"));
        assert_eq!(table.filter(&ServiceFilter::healthy(Some("orders"))).len(), 2);
        assert!(table.filter(&ServiceFilter::healthy(Some("billing"))).is_empty());

        let stats = table.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.healthy, 2);
        assert_eq!(stats.unhealthy, 1);
    }

    #[test]
    fn test_random_healthy_is_uniform() {
        let mut table = table_with_self();
        for id in ["p1", "p2", "p3"] {
            table.apply(&event(DiscoveryEventKind::Registered, id, "orders"), 0);
        }
        // unhealthy instances are never picked
        table.apply(&event(DiscoveryEventKind::Registered, "sick", "orders"), 0);
        table.apply(&event(DiscoveryEventKind::Unhealthy, "sick", "orders"), 0);

        let mut rng = StdRng::seed_from_u64(7);
        let mut hits: HashMap<String, usize> = HashMap::new();
        const SAMPLES: usize = 40_000;
        for _ in 0..SAMPLES {
            let pick = table.random_healthy("orders", &mut rng).unwrap();
            *hits.entry(pick.service_id.to_string()).or_default() += 1;
        }

        assert!(!hits.contains_key("sick"));
        assert_eq!(hits.len(), 4); // me, p1, p2, p3
        let expected = SAMPLES / 4;
        for count in hits.values() {
            let deviation = (*count as f64 - expected as f64).abs() / expected as f64;
            assert!(deviation < 0.05, "biased selection: {hits:?}");
        }
    }

    #[test]
    fn test_random_healthy_none_when_empty() {
        let table = table_with_self();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(table.random_healthy("billing", &mut rng).is_none());
    }
}
