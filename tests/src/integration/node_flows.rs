//! # Node Integration Flows
//!
//! Full mesh nodes sharing one bus: a caller finds a healthy instance through
//! its registry, then calls that instance's ping queue over RPC.

#[cfg(test)]
mod tests {
    use mesh_01_rpc::RequestOptions;
    use mesh_node::{MeshNode, NodeConfig};
    use serde_json::json;
    use shared_bus::{InMemoryMessageBus, Payload};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn node_config(name: &str) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.discovery.enabled = true;
        config.discovery.service_name = name.into();
        config.metrics_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn test_call_instance_found_through_discovery() {
        mesh_telemetry::register_metrics().unwrap();

        let bus = Arc::new(InMemoryMessageBus::new());
        let orders = MeshNode::with_bus(node_config("orders"), bus.clone()).unwrap();
        let billing = MeshNode::with_bus(node_config("billing"), bus).unwrap();
        orders.start().await.unwrap();
        billing.start().await.unwrap();

        let registry = orders.registry();
        timeout(Duration::from_secs(2), async {
            while !registry.exists("billing") {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let instance = registry.get_random("billing").unwrap();
        let reply = orders
            .rpc()
            .request(
                &format!("{}.ping", instance.service_name),
                &json!({ "from": "orders" }),
                RequestOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(reply, Payload::Json(json!({ "from": "orders" })));

        // let the reporter copy the stats at least once
        sleep(Duration::from_millis(60)).await;
        let text = mesh_telemetry::gather_text().unwrap();
        assert!(text.contains("mesh_rpc_requests_total"));
        assert!(text.contains("mesh_discovery_services"));

        billing.shutdown().await;
        timeout(Duration::from_secs(2), async {
            while registry.exists("billing") {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        orders.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_discovery_still_serves_ping() {
        let mut config = NodeConfig::default();
        config.discovery.service_name = "solo".into();
        let node = MeshNode::new(config).unwrap();
        node.start().await.unwrap();

        assert!(!node.registry().is_running());
        let reply = node
            .rpc()
            .request("solo.ping", &"hi", RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Payload::Json(json!("hi")));

        node.shutdown().await;
    }
}
