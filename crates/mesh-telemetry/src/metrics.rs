//! Prometheus metrics for mesh services.
//!
//! All metrics follow the naming convention: `mesh_<component>_<metric>[_total]`

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

/// Label values for [`RPC_REQUESTS`].
pub const RPC_OUTCOMES: [&str; 4] = ["completed", "timeout", "send_failure", "cancelled"];

/// Label values for [`DISCOVERY_SERVICES`].
pub const SERVICE_STATUSES: [&str; 3] = ["healthy", "unhealthy", "unknown"];

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // RPC METRICS
    // =========================================================================

    /// Finished RPC calls by outcome
    pub static ref RPC_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("mesh_rpc_requests_total", "Finished RPC calls by outcome"),
        &["outcome"]  // outcome: completed/timeout/send_failure/cancelled
    ).expect("metric creation failed");

    /// Calls currently waiting for a reply
    pub static ref RPC_PENDING_CALLS: IntGauge = IntGauge::new(
        "mesh_rpc_pending_calls",
        "RPC calls currently waiting for a reply"
    ).expect("metric creation failed");

    /// Replies that matched no pending call
    pub static ref RPC_ORPHANED_REPLIES: IntCounter = IntCounter::new(
        "mesh_rpc_orphaned_replies_total",
        "Replies dropped because no pending call matched"
    ).expect("metric creation failed");

    // =========================================================================
    // DISCOVERY METRICS
    // =========================================================================

    /// Known services by health status
    pub static ref DISCOVERY_SERVICES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("mesh_discovery_services", "Known service instances by status"),
        &["status"]  // status: healthy/unhealthy/unknown
    ).expect("metric creation failed");

    // =========================================================================
    // BUS METRICS
    // =========================================================================

    /// Messages accepted by the bus
    pub static ref BUS_MESSAGES_PUBLISHED: IntCounter = IntCounter::new(
        "mesh_bus_messages_published_total",
        "Messages published or sent through the bus"
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Registering again is a no-op.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // RPC
        Box::new(RPC_REQUESTS.clone()),
        Box::new(RPC_PENDING_CALLS.clone()),
        Box::new(RPC_ORPHANED_REPLIES.clone()),
        // Discovery
        Box::new(DISCOVERY_SERVICES.clone()),
        // Bus
        Box::new(BUS_MESSAGES_PUBLISHED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    // Labelled series show up as zero before their first update.
    for outcome in RPC_OUTCOMES {
        RPC_REQUESTS.with_label_values(&[outcome]);
    }
    for status in SERVICE_STATUSES {
        DISCOVERY_SERVICES.with_label_values(&[status]);
    }
    Ok(())
}

/// Add `delta` to a monotonically increasing counter.
pub fn advance_counter(counter: &IntCounter, delta: u64) {
    if delta > 0 {
        counter.inc_by(delta);
    }
}

/// Render all registered metrics in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
