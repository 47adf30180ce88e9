//! # Liveness Registry (mesh-02)
//!
//! Decentralized, eventually-consistent view of which service instances
//! exist and are healthy, built only from broadcast messages.
//!
//! ## Architecture
//!
//! Hexagonal:
//! - `domain/`: records, events, filters and the registry table (pure, time passed in)
//! - `ports`: [`TimeSource`]
//! - `service`: [`ServiceRegistry`], wiring the table to the bus and two timers
//!
//! ## Lifecycle
//!
//! `start()` subscribes to the discovery exchange, registers self and starts
//! heartbeat and sweep timers. `stop()` ends the timers, deregisters and
//! unsubscribes. Peers silent for more than half the service timeout are
//! marked unhealthy; past the full timeout they are evicted.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_possible_truncation)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports
pub use config::{DiscoveryConfig, RoutingKeys};
pub use domain::{
    DiscoveryEvent, DiscoveryEventKind, RegistryChange, RegistryStats, RemovalReason,
    ServiceFilter, ServiceId, ServiceRecord, ServiceStatus, ServiceTable,
};
pub use error::RegistryError;
pub use ports::{SystemTimeSource, TimeSource};
pub use service::ServiceRegistry;
