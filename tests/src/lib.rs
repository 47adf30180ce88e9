//! # Mesh Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── mesh_benchmarks.rs   # Pending table, registry table, topic matching
//! │
//! └── src/integration/         # Cross-crate flows over one bus
//!     ├── rpc_flows.rs
//!     ├── discovery_flows.rs
//!     └── node_flows.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p mesh-tests
//!
//! # By category
//! cargo test -p mesh-tests integration::rpc_flows
//! cargo test -p mesh-tests integration::discovery_flows
//!
//! # Benchmarks
//! cargo bench -p mesh-tests
//! ```

pub mod integration;
