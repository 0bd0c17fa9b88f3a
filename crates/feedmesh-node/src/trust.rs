//! Trust authority
//!
//! The node forwards every chain a peer announces to the configured
//! authority, adopted or not, so the authority can verify paths on its own.

use std::collections::HashMap;

use parking_lot::RwLock;

use feedmesh_core::{Chain, FeedKey};

/// Receiver of trust-chain announcements
pub trait TrustAuthority: Send + Sync {
    fn add_chain(&self, feed: &FeedKey, chain: &Chain);
}

/// Authority that records every announcement per feed
#[derive(Debug, Default)]
pub struct TrustLedger {
    chains: RwLock<HashMap<FeedKey, Vec<Chain>>>,
}

impl TrustLedger {
    pub fn new() -> Self {
        TrustLedger::default()
    }

    /// Every chain announced for `feed`, oldest first
    pub fn announcements(&self, feed: &FeedKey) -> Vec<Chain> {
        self.chains.read().get(feed).cloned().unwrap_or_default()
    }

    /// Shortest chain announced for `feed`; the earliest wins ties
    pub fn shortest(&self, feed: &FeedKey) -> Option<Chain> {
        let chains = self.chains.read();
        let announced = chains.get(feed)?;
        let mut best: Option<&Chain> = None;
        for chain in announced {
            if best.map_or(true, |b| chain.is_shorter_than(b)) {
                best = Some(chain);
            }
        }
        best.cloned()
    }

    /// Number of feeds with at least one announcement
    pub fn feed_count(&self) -> usize {
        self.chains.read().len()
    }
}

impl TrustAuthority for TrustLedger {
    fn add_chain(&self, feed: &FeedKey, chain: &Chain) {
        tracing::trace!(feed = %feed.feed_id(), len = chain.len(), "chain recorded");
        self.chains
            .write()
            .entry(*feed)
            .or_default()
            .push(chain.clone());
    }
}
