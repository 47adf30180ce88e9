//! Domain layer: correlation ids and the pending call table.

pub mod correlation;
pub mod pending;

pub use correlation::CorrelationId;
pub use pending::{CallOutcome, PendingCallTable, PendingStats, PendingStatsSnapshot};
