//! feedmesh Node - Replication coordinator
//!
//! This crate implements the coordination core of a feed replication node:
//! - Peer lifecycle over secure transports
//! - Insert pipeline: store, then fan out to peers and watchers
//! - Broadcast completion tracking with an optional quorum cap
//! - Range watchers with backlog delivery
//! - Trust-chain reconciliation (shortest chain wins)
//! - A tokio service driving the event loop

pub mod broadcast;
pub mod config;
pub mod logging;
pub mod node;
pub mod peer;
pub mod service;
pub mod trust;
pub mod watch;

pub use broadcast::*;
pub use config::*;
pub use logging::*;
pub use node::*;
pub use peer::*;
pub use service::*;
pub use trust::*;
pub use watch::*;
