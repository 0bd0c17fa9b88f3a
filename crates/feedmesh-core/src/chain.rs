//! Trust chains
//!
//! A chain is the ordered list of authorization links that lets a writer
//! append to a feed. Links are opaque here; verifying them is the trust
//! authority's job. Shorter chains are preferred.

use std::fmt;

use bytes::Bytes;

/// One authorization link
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ChainLink(Bytes);

impl ChainLink {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        ChainLink(bytes.into())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link(<{} bytes>)", self.0.len())
    }
}

/// Ordered trust path, root first
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Chain(Vec<ChainLink>);

impl Chain {
    pub fn new(links: Vec<ChainLink>) -> Self {
        Chain(links)
    }

    pub fn empty() -> Self {
        Chain(Vec::new())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.0
    }

    /// Strictly fewer links than `other`
    #[inline]
    pub fn is_shorter_than(&self, other: &Chain) -> bool {
        self.0.len() < other.0.len()
    }
}

impl FromIterator<ChainLink> for Chain {
    fn from_iter<I: IntoIterator<Item = ChainLink>>(iter: I) -> Self {
        Chain(iter.into_iter().collect())
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain(len={})", self.0.len())
    }
}
