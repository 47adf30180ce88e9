//! # Discovery Integration Flows
//!
//! Several registries gossiping over one bus:
//!
//! 1. Peers find each other from registration broadcasts alone
//! 2. A graceful stop removes the peer everywhere
//! 3. A silent peer is demoted, then expired, by the local sweep
//! 4. Health announcements and filters drive instance selection

#[cfg(test)]
mod tests {
    use mesh_02_discovery::test_utils::FixedTimeSource;
    use mesh_02_discovery::{
        DiscoveryConfig, RegistryChange, RemovalReason, ServiceFilter, ServiceRegistry,
        ServiceStatus,
    };
    use shared_bus::InMemoryMessageBus;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn peer(bus: &Arc<InMemoryMessageBus>, name: &str) -> ServiceRegistry {
        ServiceRegistry::new(bus.clone(), DiscoveryConfig::for_service(name)).unwrap()
    }

    /// Poll until `check` holds, failing after two seconds.
    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !check() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    // =============================================================================
    // INTEGRATION TESTS
    // =============================================================================

    #[tokio::test]
    async fn test_peers_discover_each_other() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let orders = peer(&bus, "orders");
        let billing = peer(&bus, "billing");
        let shipping = peer(&bus, "shipping");

        orders.start().await.unwrap();
        billing.start().await.unwrap();
        shipping.start().await.unwrap();

        wait_until(|| orders.count(None) == 3).await;
        assert!(orders.exists("billing"));
        assert!(orders.exists("shipping"));
        wait_until(|| billing.exists("shipping")).await;

        // earlier starters reach later ones only on their next heartbeat
        assert!(!shipping.exists("orders"));
        assert_eq!(shipping.count(None), 1);

        shipping.stop().await;
        billing.stop().await;
        orders.stop().await;
    }

    #[tokio::test]
    async fn test_graceful_stop_removes_peer() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let orders = peer(&bus, "orders");
        let billing = peer(&bus, "billing");

        orders.start().await.unwrap();
        billing.start().await.unwrap();
        wait_until(|| orders.exists("billing")).await;

        let mut changes = orders.changes();
        billing.stop().await;

        let change = timeout(Duration::from_secs(2), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            change,
            RegistryChange::Removed { ref record, reason: RemovalReason::Deregistered }
                if record.service_name == "billing"
        ));
        assert!(!orders.exists("billing"));
        assert_eq!(orders.count(None), 1);

        orders.stop().await;
    }

    #[tokio::test]
    async fn test_silent_peer_is_demoted_then_expired() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let clock = Arc::new(FixedTimeSource::new(1_000_000));
        let orders = ServiceRegistry::with_time_source(
            bus.clone(),
            DiscoveryConfig::for_service("orders"),
            clock.clone(),
        )
        .unwrap();
        let billing = peer(&bus, "billing");

        orders.start().await.unwrap();
        billing.start().await.unwrap();
        wait_until(|| orders.exists("billing")).await;

        // billing crashes: no deregistration, no more heartbeats
        drop(billing);

        // past half the 90s timeout
        clock.advance(50_000);
        let changes = orders.sweep();
        assert_eq!(changes.len(), 1);
        assert!(matches!(
            changes[0],
            RegistryChange::StatusChanged { to: ServiceStatus::Unhealthy, .. }
        ));
        assert!(orders.exists("billing"));
        assert!(orders.get_healthy(Some("billing")).is_empty());

        // past the full timeout
        clock.advance(50_000);
        let changes = orders.sweep();
        assert!(matches!(
            changes.as_slice(),
            [RegistryChange::Removed { reason: RemovalReason::Expired, .. }]
        ));
        assert!(!orders.exists("billing"));

        // self is never swept
        assert!(orders.self_record().is_some());
        orders.stop().await;
    }

    #[tokio::test]
    async fn test_health_and_filters_drive_selection() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let orders = peer(&bus, "orders");
        let eu = ServiceRegistry::new(
            bus.clone(),
            DiscoveryConfig {
                tags: ["eu-west".to_string()].into(),
                ..DiscoveryConfig::for_service("billing")
            },
        )
        .unwrap();
        let us = ServiceRegistry::new(
            bus.clone(),
            DiscoveryConfig {
                tags: ["us-east".to_string()].into(),
                ..DiscoveryConfig::for_service("billing")
            },
        )
        .unwrap();

        orders.start().await.unwrap();
        eu.start().await.unwrap();
        us.start().await.unwrap();
        wait_until(|| orders.count(Some("billing")) == 2).await;

        // random selection covers both instances
        let mut picked = HashSet::new();
        for _ in 0..200 {
            picked.insert(orders.get_random("billing").unwrap().service_id);
        }
        assert_eq!(picked.len(), 2);

        let in_eu = orders.get_by_filter(&ServiceFilter::new().service_name("billing").tag("eu-west"));
        assert_eq!(in_eu.len(), 1);
        assert_eq!(&in_eu[0].service_id, eu.self_id());

        // eu reports itself unhealthy: only us remains selectable
        eu.announce_health(ServiceStatus::Unhealthy).await.unwrap();
        wait_until(|| orders.get_healthy(Some("billing")).len() == 1).await;
        for _ in 0..20 {
            assert_eq!(&orders.get_random("billing").unwrap().service_id, us.self_id());
        }
        assert!(orders.exists("billing"));

        us.stop().await;
        eu.stop().await;
        orders.stop().await;
    }
}
