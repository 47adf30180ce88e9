//! Outbound ports.

use std::time::{SystemTime, UNIX_EPOCH};

/// Abstract interface for the wall clock.
///
/// The sweep compares heartbeat arrival times against `now_ms()`, so tests
/// swap in a controllable source.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Production time source backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
