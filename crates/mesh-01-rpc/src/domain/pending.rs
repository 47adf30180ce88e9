//! Pending Call Table - async-to-sync bridge for request/reply.
//!
//! Maps correlation IDs to callers parked on a reply. Every entry leaves the
//! table exactly once: the first of reply, expiry, send failure or caller
//! abandonment to remove it wins, and every later attempt is a no-op.

use crate::domain::correlation::CorrelationId;
use crate::error::RpcError;
use dashmap::DashMap;
use serde::Serialize;
use shared_bus::Payload;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What a parked caller is resumed with.
pub type CallOutcome = Result<Payload, RpcError>;

/// A caller waiting for a reply.
struct PendingCall {
    /// Single-use continuation.
    continuation: oneshot::Sender<CallOutcome>,
    /// When the call was issued.
    created_at: Instant,
    /// Absolute expiry time.
    deadline: Instant,
    /// Destination queue (for logging).
    destination: String,
}

/// Counters for the table.
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_timeouts: AtomicU64,
    pub total_send_failures: AtomicU64,
    /// Caller went away (future dropped) or the engine shut down.
    pub total_cancelled: AtomicU64,
    /// Replies with no matching entry.
    pub total_orphaned: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingStatsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub send_failures: u64,
    pub cancelled: u64,
    pub orphaned_replies: u64,
    pub pending: u64,
}

/// Correlation table shared by every call using one reply destination.
pub struct PendingCallTable {
    pending: DashMap<CorrelationId, PendingCall>,
    stats: PendingStats,
}

impl PendingCallTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: PendingStats::default(),
        }
    }

    /// Park a new call and get the receiver its outcome will arrive on.
    pub fn register(
        &self,
        destination: &str,
        timeout: Duration,
    ) -> (CorrelationId, oneshot::Receiver<CallOutcome>) {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();

        self.pending.insert(
            correlation_id,
            PendingCall {
                continuation: tx,
                created_at: now,
                deadline: now + timeout,
                destination: destination.to_string(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = %correlation_id,
            destination = destination,
            timeout_ms = timeout.as_millis() as u64,
            "Registered pending call"
        );

        (correlation_id, rx)
    }

    /// Resolve a call with its reply.
    ///
    /// Returns false if the id is unknown (expired, already resolved, or
    /// issued by another engine); the outcome is then dropped.
    pub fn complete(&self, correlation_id: CorrelationId, outcome: CallOutcome) -> bool {
        let Some((_, call)) = self.pending.remove(&correlation_id) else {
            self.stats.total_orphaned.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %correlation_id,
                "Reply for unknown or expired correlation ID"
            );
            return false;
        };

        let elapsed = call.created_at.elapsed();
        if call.continuation.send(outcome).is_err() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                destination = %call.destination,
                "Caller went away before its reply arrived"
            );
            return false;
        }

        self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %correlation_id,
            destination = %call.destination,
            elapsed_ms = elapsed.as_millis() as u64,
            "Completed pending call"
        );
        true
    }

    /// Remove a call whose deadline fired. Returns false if a reply already won.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        let Some((_, call)) = self.pending.remove(correlation_id) else {
            return false;
        };
        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(
            correlation_id = %correlation_id,
            destination = %call.destination,
            overdue_ms = Instant::now().saturating_duration_since(call.deadline).as_millis() as u64,
            "Pending call timed out"
        );
        true
    }

    /// Remove a call whose request never left (send failed).
    pub fn discard(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_send_failures.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Remove a call whose caller stopped waiting. No-op once resolved.
    pub fn abandon(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %correlation_id, "Pending call abandoned");
            true
        } else {
            false
        }
    }

    /// Count a reply that could not even be attributed to an id.
    pub fn record_orphan(&self) {
        self.stats.total_orphaned.fetch_add(1, Ordering::Relaxed);
    }

    /// Fail every parked call with `RpcError::Cancelled`. Returns how many.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| *e.key()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.continuation.send(Err(RpcError::Cancelled));
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                cancelled += 1;
            }
        }
        cancelled
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    #[must_use]
    pub fn stats(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            registered: self.stats.total_registered.load(Ordering::Relaxed),
            completed: self.stats.total_completed.load(Ordering::Relaxed),
            timed_out: self.stats.total_timeouts.load(Ordering::Relaxed),
            send_failures: self.stats.total_send_failures.load(Ordering::Relaxed),
            cancelled: self.stats.total_cancelled.load(Ordering::Relaxed),
            orphaned_replies: self.stats.total_orphaned.load(Ordering::Relaxed),
            pending: self.pending.len() as u64,
        }
    }
}

impl Default for PendingCallTable {
    fn default() -> Self {
        Self::new()
    }
}
