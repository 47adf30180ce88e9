//! # Liveness Registry Service
//!
//! Connects the [`ServiceTable`] to the bus and to two timers.
//!
//! ```text
//!   discovery exchange (topic) ──#──▶ private queue ──▶ EventIntake ──▶ table.apply()
//!          ▲
//!          │ registered / heartbeat / deregistered / healthy / unhealthy
//!          │
//!   heartbeat loop (every heartbeat_interval)      sweep loop (every sweep_interval)
//!          └── table.touch_self() + publish            └── table.sweep()
//! ```
//!
//! The table sits behind one lock, so event intake, heartbeats and sweeps
//! are serialized. A heartbeat arriving during a sweep is applied either
//! entirely before or entirely after it.

use crate::config::DiscoveryConfig;
use crate::domain::{
    DiscoveryEvent, DiscoveryEventKind, RegistryChange, RegistryStats, RemovalReason,
    ServiceFilter, ServiceId, ServiceRecord, ServiceStatus, ServiceTable,
};
use crate::error::RegistryError;
use crate::ports::{SystemTimeSource, TimeSource};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_bus::{
    ConsumerTag, Delivery, ExchangeKind, ExchangeOptions, MessageBus, MessageHandler, Payload,
    PublishOptions, QueueOptions, CONTENT_TYPE_JSON,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

/// Buffered changes per subscriber before it starts lagging.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// State shared by the registry handle, the bus consumer and the timers.
struct RegistryCore {
    bus: Arc<dyn MessageBus>,
    config: DiscoveryConfig,
    time: Arc<dyn TimeSource>,
    table: RwLock<ServiceTable>,
    changes: broadcast::Sender<RegistryChange>,
}

impl RegistryCore {
    fn emit(&self, change: RegistryChange) {
        match &change {
            RegistryChange::Added(record) => info!(
                service_id = %record.service_id,
                service = %record.service_name,
                host = %record.host,
                port = record.port,
                "Service discovered"
            ),
            RegistryChange::Updated(record) => {
                debug!(service_id = %record.service_id, "Heartbeat received");
            }
            RegistryChange::StatusChanged {
                service_id,
                service_name,
                from,
                to,
            } => info!(
                service_id = %service_id,
                service = %service_name,
                from = %from,
                to = %to,
                "Service status changed"
            ),
            RegistryChange::Removed {
                record,
                reason: RemovalReason::Expired,
            } => warn!(
                service_id = %record.service_id,
                service = %record.service_name,
                "Service expired after missing heartbeats"
            ),
            RegistryChange::Removed { record, .. } => info!(
                service_id = %record.service_id,
                service = %record.service_name,
                "Service deregistered"
            ),
        }
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    /// Publish an event about `record` to every registry on the exchange.
    async fn broadcast(
        &self,
        kind: DiscoveryEventKind,
        record: ServiceRecord,
    ) -> Result<(), RegistryError> {
        let routing_key = self
            .config
            .routing_keys
            .routing_key(kind, &record.service_name);
        let event = DiscoveryEvent::new(kind, record, self.time.now_ms());
        let body = Payload::encode(&event)?;

        self.bus
            .publish(
                &self.config.discovery_exchange,
                &routing_key,
                body,
                PublishOptions::with_content_type(CONTENT_TYPE_JSON),
            )
            .await?;

        debug!(routing_key = %routing_key, event = %kind, "Published discovery event");
        Ok(())
    }

    async fn heartbeat(&self) {
        let now = self.time.now_ms();
        let touched = self.table.write().touch_self(now);
        let Some(record) = touched else {
            return;
        };
        if let Err(e) = self.broadcast(DiscoveryEventKind::Heartbeat, record).await {
            warn!(error = %e, "Heartbeat broadcast failed");
        }
    }

    fn sweep(&self) -> Vec<RegistryChange> {
        let now = self.time.now_ms();
        let changes = self
            .table
            .write()
            .sweep(now, self.config.service_timeout_ms);
        for change in &changes {
            self.emit(change.clone());
        }
        changes
    }

    fn intake(&self, event: &DiscoveryEvent) {
        let now = self.time.now_ms();
        let change = self.table.write().apply(event, now);
        if let Some(change) = change {
            self.emit(change);
        }
    }
}

/// Applies discovery events arriving on the private subscription.
struct EventIntake {
    core: Arc<RegistryCore>,
}

#[async_trait]
impl MessageHandler for EventIntake {
    async fn handle(&self, delivery: Delivery) {
        let payload = Payload::decode(
            delivery.payload,
            delivery.properties.content_type.as_deref(),
        );
        match payload.deserialize::<DiscoveryEvent>() {
            Ok(event) => self.core.intake(&event),
            Err(e) => debug!(
                routing_key = %delivery.routing_key,
                error = %e,
                "Ignoring malformed discovery event"
            ),
        }
    }
}

/// Everything `stop()` has to tear down.
struct Running {
    consumer: ConsumerTag,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Decentralized liveness registry for one process.
///
/// Dropping the registry without calling [`stop`](Self::stop) still ends the
/// timers, but sends no deregistration.
pub struct ServiceRegistry {
    core: Arc<RegistryCore>,
    self_id: ServiceId,
    running: Mutex<Option<Running>>,
    is_running: AtomicBool,
}

impl ServiceRegistry {
    /// Create a registry using the system clock.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidConfig` if the config fails validation.
    pub fn new(bus: Arc<dyn MessageBus>, config: DiscoveryConfig) -> Result<Self, RegistryError> {
        Self::with_time_source(bus, config, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        bus: Arc<dyn MessageBus>,
        config: DiscoveryConfig,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, RegistryError> {
        config.validate()?;
        let self_id = ServiceId::generate();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            core: Arc::new(RegistryCore {
                bus,
                config,
                time,
                table: RwLock::new(ServiceTable::new(self_id.clone())),
                changes,
            }),
            self_id,
            running: Mutex::new(None),
            is_running: AtomicBool::new(false),
        })
    }

    /// Subscribe, announce self and start the heartbeat and sweep timers.
    ///
    /// A no-op when discovery is disabled.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyRunning` on a second start
    /// - `RegistryError::Transport` if the exchange, queue, binding or consumer
    ///   cannot be set up; nothing is left running in that case
    pub async fn start(&self) -> Result<(), RegistryError> {
        let config = &self.core.config;
        if !config.enabled {
            info!(service = %config.service_name, "Service discovery disabled");
            return Ok(());
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(RegistryError::AlreadyRunning);
        }

        let consumer = self.subscribe().await.map_err(|e| {
            error!(
                exchange = %config.discovery_exchange,
                error = %e,
                "Failed to set up discovery subscription"
            );
            e
        })?;

        let record = config.self_record(self.self_id.clone(), self.core.time.now_ms());
        let change = self.core.table.write().insert_self(record.clone());
        self.core.emit(change);

        // A lost announcement is recovered by the next heartbeat.
        if let Err(e) = self
            .core
            .broadcast(DiscoveryEventKind::Registered, record)
            .await
        {
            warn!(error = %e, "Registration broadcast failed");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(heartbeat_loop(Arc::clone(&self.core), shutdown_rx.clone())),
            tokio::spawn(sweep_loop(Arc::clone(&self.core), shutdown_rx)),
        ];

        *running = Some(Running {
            consumer,
            shutdown: shutdown_tx,
            tasks,
        });
        self.is_running.store(true, Ordering::Release);

        info!(
            service_id = %self.self_id,
            service = %config.service_name,
            heartbeat_ms = config.heartbeat_interval_ms,
            timeout_ms = config.service_timeout_ms,
            "Service registry started"
        );
        Ok(())
    }

    async fn subscribe(&self) -> Result<ConsumerTag, RegistryError> {
        let bus = &self.core.bus;
        let exchange = &self.core.config.discovery_exchange;

        bus.assert_exchange(
            exchange,
            ExchangeKind::Topic,
            ExchangeOptions {
                durable: true,
                auto_delete: false,
            },
        )
        .await?;
        let queue = bus.assert_queue("", QueueOptions::private()).await?;

        // Consume before binding: an unbound queue receives nothing, and once
        // consumed the auto-delete queue goes away with its consumer.
        let intake = Arc::new(EventIntake {
            core: Arc::clone(&self.core),
        });
        let consumer = bus.consume(&queue.name, intake).await?;
        if let Err(e) = bus.bind_queue(&queue.name, exchange, "#").await {
            if let Err(cancel_err) = bus.cancel(&consumer).await {
                warn!(queue = %queue.name, error = %cancel_err, "Failed to release discovery queue");
            }
            return Err(e.into());
        }
        debug!(queue = %queue.name, exchange = %exchange, "Subscribed to discovery events");
        Ok(consumer)
    }

    /// Stop the timers, announce deregistration and unsubscribe.
    ///
    /// Safe to call when never started, or more than once.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(state) = running.take() else {
            debug!("Service registry not running; nothing to stop");
            return;
        };
        self.is_running.store(false, Ordering::Release);

        // Timers first, so no heartbeat can follow the deregistration.
        let _ = state.shutdown.send(true);
        for task in state.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Registry timer ended abnormally");
            }
        }

        let removed = self.core.table.write().remove_self();
        if let Some(record) = removed {
            if let Err(e) = self
                .core
                .broadcast(DiscoveryEventKind::Deregistered, record.clone())
                .await
            {
                warn!(error = %e, "Deregistration broadcast failed");
            }
            self.core.emit(RegistryChange::Removed {
                record,
                reason: RemovalReason::Deregistered,
            });
        }

        if let Err(e) = self.core.bus.cancel(&state.consumer).await {
            warn!(error = %e, "Failed to cancel discovery consumer");
        }
        // Without intake the peer view can only go stale.
        self.core.table.write().clear();

        info!(service_id = %self.self_id, "Service registry stopped");
    }

    /// Announce a health status for this process and apply it locally.
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidStatus` for `ServiceStatus::Unknown`
    /// - `RegistryError::NotRunning` before `start()` or after `stop()`
    /// - `RegistryError::Transport` if the publish fails
    pub async fn announce_health(&self, status: ServiceStatus) -> Result<(), RegistryError> {
        let kind = match status {
            ServiceStatus::Healthy => DiscoveryEventKind::Healthy,
            ServiceStatus::Unhealthy => DiscoveryEventKind::Unhealthy,
            ServiceStatus::Unknown => return Err(RegistryError::InvalidStatus(status)),
        };
        if !self.is_running() {
            return Err(RegistryError::NotRunning);
        }

        let (change, record) = {
            let mut table = self.core.table.write();
            let change = table.set_self_status(status);
            (change, table.self_record().cloned())
        };
        if let Some(change) = change {
            self.core.emit(change);
        }
        let record = record.ok_or(RegistryError::NotRunning)?;
        self.core.broadcast(kind, record).await
    }

    /// Run one sweep now. The sweep timer calls this periodically.
    pub fn sweep(&self) -> Vec<RegistryChange> {
        self.core.sweep()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Every known record, self included.
    #[must_use]
    pub fn get_all(&self) -> Vec<ServiceRecord> {
        self.core.table.read().all()
    }

    #[must_use]
    pub fn get_by_filter(&self, filter: &ServiceFilter) -> Vec<ServiceRecord> {
        self.core.table.read().filter(filter)
    }

    #[must_use]
    pub fn get_healthy(&self, service_name: Option<&str>) -> Vec<ServiceRecord> {
        self.get_by_filter(&ServiceFilter::healthy(service_name))
    }

    /// Uniform random pick among the healthy instances of `service_name`.
    #[must_use]
    pub fn get_random(&self, service_name: &str) -> Option<ServiceRecord> {
        self.core
            .table
            .read()
            .random_healthy(service_name, &mut rand::thread_rng())
    }

    #[must_use]
    pub fn count(&self, service_name: Option<&str>) -> usize {
        self.core.table.read().count(service_name)
    }

    #[must_use]
    pub fn exists(&self, service_name: &str) -> bool {
        self.core.table.read().exists(service_name)
    }

    #[must_use]
    pub fn get_by_id(&self, service_id: &str) -> Option<ServiceRecord> {
        self.core.table.read().get(service_id).cloned()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.core.table.read().stats()
    }

    #[must_use]
    pub fn self_id(&self) -> &ServiceId {
        &self.self_id
    }

    /// This process's record while registered.
    #[must_use]
    pub fn self_record(&self) -> Option<ServiceRecord> {
        self.core.table.read().self_record().cloned()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.core.config
    }

    /// Subscribe to table changes from now on.
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<RegistryChange> {
        self.core.changes.subscribe()
    }

    /// [`changes`](Self::changes) as a stream. Lagged notifications are skipped.
    pub fn change_stream(&self) -> impl Stream<Item = RegistryChange> + Send + 'static {
        BroadcastStream::new(self.changes()).filter_map(Result::ok)
    }
}

async fn heartbeat_loop(core: Arc<RegistryCore>, mut shutdown: watch::Receiver<bool>) {
    let period = core.config.heartbeat_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => core.heartbeat().await,
            _ = shutdown.changed() => break,
        }
    }
    debug!("Heartbeat loop stopped");
}

async fn sweep_loop(core: Arc<RegistryCore>, mut shutdown: watch::Receiver<bool>) {
    let period = core.config.sweep_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let changes = core.sweep();
                if !changes.is_empty() {
                    debug!(changes = changes.len(), "Sweep applied");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("Sweep loop stopped");
}
