//! feedmesh Core - Fundamental types
//!
//! This crate defines the types shared by every feedmesh crate:
//! - Identifiers (FeedKey, PeerId, WatcherId)
//! - Content values and key ranges
//! - Trust chains
//! - Feed keypairs
//! - Errors

pub mod chain;
pub mod error;
pub mod id;
pub mod identity;
pub mod value;

pub use chain::*;
pub use error::*;
pub use id::*;
pub use identity::*;
pub use value::*;
