//! Mesh node executable.

use anyhow::{Context, Result};
use mesh_node::{MeshNode, NodeConfig};
use mesh_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging and metrics
    init_telemetry(&TelemetryConfig::from_env()).context("Failed to initialize telemetry")?;

    // Load configuration
    let config = NodeConfig::load().context("Failed to load configuration")?;

    // Create and start the node
    let node = MeshNode::new(config)?;
    node.start().await?;

    // Keep the node running
    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    node.shutdown().await;

    Ok(())
}
