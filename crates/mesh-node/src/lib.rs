//! # Mesh Node
//!
//! Composes the RPC engine, an echo responder and the liveness registry over
//! one message bus, and reports their stats as metrics.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_possible_wrap)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod reporter;

pub use config::{ConfigError, NodeConfig};
pub use reporter::MetricsReporter;

use anyhow::{Context, Result};
use mesh_01_rpc::{handler_fn, RpcEngine, RpcResponder};
use mesh_02_discovery::ServiceRegistry;
use shared_bus::{InMemoryMessageBus, MessageBus, Payload};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

/// One mesh process.
pub struct MeshNode {
    config: NodeConfig,
    bus: Arc<InMemoryMessageBus>,
    rpc: Arc<RpcEngine>,
    responder: RpcResponder,
    registry: Arc<ServiceRegistry>,
    shutdown_tx: watch::Sender<bool>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl MeshNode {
    /// Build a node on a private in-memory bus.
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_bus(config, Arc::new(InMemoryMessageBus::new()))
    }

    /// Build a node on a shared bus, so several nodes can talk in one process.
    pub fn with_bus(config: NodeConfig, bus: Arc<InMemoryMessageBus>) -> Result<Self> {
        config.validate().context("Invalid node configuration")?;
        info!(service = %config.discovery.service_name, "Creating mesh node");

        let dyn_bus: Arc<dyn MessageBus> = bus.clone();
        let rpc = Arc::new(RpcEngine::new(Arc::clone(&dyn_bus), config.rpc.clone()));
        let responder = RpcResponder::new(Arc::clone(&dyn_bus));
        let registry = Arc::new(
            ServiceRegistry::new(dyn_bus, config.discovery.clone())
                .context("Failed to create service registry")?,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            bus,
            rpc,
            responder,
            registry,
            shutdown_tx,
            reporter: Mutex::new(None),
        })
    }

    pub async fn start(&self) -> Result<()> {
        info!("===========================================");
        info!("  Mesh Node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let ping_queue = self.config.ping_queue();
        let echo = handler_fn(|request: Payload| async move { Ok(Some(request)) });
        self.responder
            .serve(&ping_queue, Arc::new(echo))
            .await
            .with_context(|| format!("Failed to serve {ping_queue}"))?;

        self.registry
            .start()
            .await
            .context("Failed to start service registry")?;

        let mut reporter = self.reporter.lock().await;
        if reporter.is_none() {
            *reporter = Some(self.spawn_reporter());
        }

        info!(
            service = %self.config.discovery.service_name,
            service_id = %self.registry.self_id(),
            discovery = self.config.discovery.enabled,
            ping_queue = %ping_queue,
            "Mesh node running"
        );
        Ok(())
    }

    fn spawn_reporter(&self) -> JoinHandle<()> {
        let rpc = Arc::clone(&self.rpc);
        let registry = Arc::clone(&self.registry);
        let bus = Arc::clone(&self.bus);
        let period = self.config.metrics_interval();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut reporter = MetricsReporter::new();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reporter.record(rpc.stats(), registry.stats(), bus.messages_published());
                    }
                    _ = shutdown.changed() => {
                        info!("Metrics reporter shutdown signal received");
                        break;
                    }
                }
            }
        })
    }

    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.reporter.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Metrics reporter ended abnormally: {}", e);
            }
        }

        self.registry.stop().await;
        self.responder.stop().await;
        self.rpc.shutdown().await;

        info!("Shutdown complete");
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> Arc<InMemoryMessageBus> {
        Arc::clone(&self.bus)
    }

    #[must_use]
    pub fn rpc(&self) -> Arc<RpcEngine> {
        Arc::clone(&self.rpc)
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.registry)
    }
}
