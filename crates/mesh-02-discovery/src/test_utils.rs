//! Test utilities for the liveness registry.
//!
//! Enable with the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use mesh_02_discovery::test_utils::FixedTimeSource;
//! use mesh_02_discovery::TimeSource;
//!
//! let time = FixedTimeSource::new(1_000);
//! time.advance(500);
//! assert_eq!(time.now_ms(), 1_500);
//! ```

use crate::ports::TimeSource;
use std::sync::atomic::{AtomicU64, Ordering};

/// A time source that only moves when told to.
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    now_ms: AtomicU64,
}

impl FixedTimeSource {
    #[must_use]
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
