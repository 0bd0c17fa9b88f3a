//! feedmesh Store - Content storage
//!
//! This crate defines what the node needs from a content store and ships
//! the default in-memory implementation:
//! - Membership checks
//! - Batch insert reporting the newly accepted subset
//! - Range queries

pub mod memory;
pub mod store;

pub use memory::*;
pub use store::*;
