//! Copies engine, registry and bus counters into the Prometheus metrics.

use mesh_01_rpc::PendingStatsSnapshot;
use mesh_02_discovery::RegistryStats;
use mesh_telemetry::{
    advance_counter, BUS_MESSAGES_PUBLISHED, DISCOVERY_SERVICES, RPC_ORPHANED_REPLIES,
    RPC_PENDING_CALLS, RPC_REQUESTS,
};

/// Keeps the last sample so monotonic counters advance by the difference.
#[derive(Debug, Default)]
pub struct MetricsReporter {
    last_rpc: PendingStatsSnapshot,
    last_published: u64,
}

impl MetricsReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rpc: PendingStatsSnapshot, registry: RegistryStats, published: u64) {
        let last = self.last_rpc;
        let outcomes = [
            ("completed", rpc.completed, last.completed),
            ("timeout", rpc.timed_out, last.timed_out),
            ("send_failure", rpc.send_failures, last.send_failures),
            ("cancelled", rpc.cancelled, last.cancelled),
        ];
        for (outcome, now, before) in outcomes {
            advance_counter(
                &RPC_REQUESTS.with_label_values(&[outcome]),
                now.saturating_sub(before),
            );
        }
        advance_counter(
            &RPC_ORPHANED_REPLIES,
            rpc.orphaned_replies.saturating_sub(last.orphaned_replies),
        );
        RPC_PENDING_CALLS.set(rpc.pending as i64);

        DISCOVERY_SERVICES
            .with_label_values(&["healthy"])
            .set(registry.healthy as i64);
        DISCOVERY_SERVICES
            .with_label_values(&["unhealthy"])
            .set(registry.unhealthy as i64);
        DISCOVERY_SERVICES
            .with_label_values(&["unknown"])
            .set(registry.unknown as i64);

        advance_counter(
            &BUS_MESSAGES_PUBLISHED,
            published.saturating_sub(self.last_published),
        );

        self.last_rpc = rpc;
        self.last_published = published;
    }
}
