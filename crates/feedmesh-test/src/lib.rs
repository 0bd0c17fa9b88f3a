//! feedmesh Test Harness - Coordinator validation
//!
//! This crate provides:
//! - Manually driven transports
//! - Recording probe peers with manual or automatic acknowledgement
//! - In-memory linked peers replicating between nodes
//! - Single-node and multi-node harnesses
//! - End-to-end coordinator scenarios

pub mod harness;
pub mod link;
pub mod probe;
pub mod transport;

#[cfg(test)]
mod scenarios;

pub use harness::*;
pub use link::*;
pub use probe::*;
pub use transport::*;
