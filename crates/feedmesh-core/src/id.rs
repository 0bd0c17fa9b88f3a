//! Identity types for feedmesh
//!
//! Feed keys are fixed-length public keys. Everything the node hands out
//! locally (peers, watchers, broadcasts) is a 64-bit counter value that is
//! only meaningful inside one node.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::{FeedError, FeedResult};

/// Length of a feed key in bytes (ed25519 public key)
pub const FEED_KEY_LEN: usize = 32;

/// Feed identity - the public key naming the replicated namespace
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey([u8; FEED_KEY_LEN]);

impl FeedKey {
    #[inline]
    pub fn from_bytes(bytes: [u8; FEED_KEY_LEN]) -> Self {
        FeedKey(bytes)
    }

    /// Parse a feed key from a slice, rejecting anything but 32 bytes
    pub fn from_slice(bytes: &[u8]) -> FeedResult<Self> {
        let key: [u8; FEED_KEY_LEN] = bytes.try_into().map_err(|_| FeedError::InvalidKeyLength {
            expected: FEED_KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(FeedKey(key))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; FEED_KEY_LEN] {
        &self.0
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; FEED_KEY_LEN] {
        self.0
    }

    /// Short fingerprint used in logs (first 8 bytes of SHA-256)
    pub fn feed_id(&self) -> FeedId {
        let hash = Sha256::digest(self.0);
        let mut id = [0u8; 8];
        id.copy_from_slice(&hash[0..8]);
        FeedId(u64::from_le_bytes(id))
    }
}

impl fmt::Debug for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedKey(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Secret key material. Never printed, never transmitted.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn from_slice(bytes: &[u8]) -> FeedResult<Self> {
        if bytes.is_empty() {
            return Err(FeedError::InvalidArgument(
                "private key must not be empty".into(),
            ));
        }
        Ok(PrivateKey(bytes.to_vec()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PrivateKey(bytes.to_vec())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(<{} bytes>)", self.0.len())
    }
}

/// Truncated feed fingerprint
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FeedId(pub u64);

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Feed({:016x})", self.0)
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Peer identity - one per transport session, assigned at connect time
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PeerId(pub u64);

impl PeerId {
    #[inline]
    pub fn new(id: u64) -> Self {
        PeerId(id)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Watcher identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct WatcherId(pub u64);

impl WatcherId {
    #[inline]
    pub fn new(id: u64) -> Self {
        WatcherId(id)
    }
}

impl fmt::Debug for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Watcher({})", self.0)
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one broadcast fan-out
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BroadcastId(pub u64);

impl fmt::Debug for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Broadcast({})", self.0)
    }
}
