//! Domain Layer - registry state with no I/O
//!
//! - Service records, ids and health status
//! - Discovery events exchanged between peers
//! - Query filters
//! - The registry table and its heartbeat/sweep rules

pub mod change;
pub mod event;
pub mod filter;
pub mod record;
pub mod table;

pub use change::{RegistryChange, RegistryStats, RemovalReason};
pub use event::{DiscoveryEvent, DiscoveryEventKind};
pub use filter::ServiceFilter;
pub use record::{ServiceId, ServiceRecord, ServiceStatus};
pub use table::ServiceTable;
