//! Cross-crate integration flows.

pub mod discovery_flows;
pub mod node_flows;
pub mod rpc_flows;
