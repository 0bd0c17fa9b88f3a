//! Peer and transport contracts
//!
//! A transport is one authenticated session. Once it reports `secure`, the
//! node asks its [`PeerFactory`] to wrap it in a [`PeerUnit`], which speaks
//! the replication protocol on that session. Both report back to the node
//! through an [`EventSink`]; nothing they do reaches into node state
//! directly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use feedmesh_core::{BroadcastId, Chain, FeedKey, FeedResult, PeerId, PrivateKey, Range, Value};
use feedmesh_store::ContentStore;

use crate::TrustAuthority;

/// Asynchronous input to the node's event loop
#[derive(Debug)]
pub enum NodeEvent {
    /// Session handshake completed
    Secure { peer: PeerId },
    /// Remote announced a trust chain
    ChainUpdate { peer: PeerId, chain: Chain },
    /// Remote pushed content
    Values { peer: PeerId, values: Vec<Value> },
    /// A per-peer broadcast finished
    BroadcastDone { peer: PeerId, broadcast: BroadcastId },
    /// Transport or protocol failure
    PeerError { peer: PeerId, error: String },
    /// Session closed
    Closed { peer: PeerId },
}

impl NodeEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            NodeEvent::Secure { peer }
            | NodeEvent::ChainUpdate { peer, .. }
            | NodeEvent::Values { peer, .. }
            | NodeEvent::BroadcastDone { peer, .. }
            | NodeEvent::PeerError { peer, .. }
            | NodeEvent::Closed { peer } => *peer,
        }
    }
}

/// Event sender bound to one peer
#[derive(Clone)]
pub struct EventSink {
    peer: PeerId,
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl EventSink {
    pub(crate) fn new(peer: PeerId, tx: mpsc::UnboundedSender<NodeEvent>) -> Self {
        EventSink { peer, tx }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn secure(&self) {
        self.send(NodeEvent::Secure { peer: self.peer });
    }

    pub fn chain_update(&self, chain: Chain) {
        self.send(NodeEvent::ChainUpdate {
            peer: self.peer,
            chain,
        });
    }

    pub fn values(&self, values: Vec<Value>) {
        self.send(NodeEvent::Values {
            peer: self.peer,
            values,
        });
    }

    pub fn error(&self, error: impl fmt::Display) {
        self.send(NodeEvent::PeerError {
            peer: self.peer,
            error: error.to_string(),
        });
    }

    pub fn closed(&self) {
        self.send(NodeEvent::Closed { peer: self.peer });
    }

    fn send(&self, event: NodeEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!(peer = %self.peer, "node gone, event dropped");
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").field("peer", &self.peer).finish()
    }
}

/// Acknowledgement handle for one per-peer broadcast.
///
/// The peer unit completes it once the values are delivered. Dropping it
/// without completing leaves the broadcast outstanding.
#[must_use = "an unacknowledged broadcast never completes"]
pub struct BroadcastAck {
    broadcast: BroadcastId,
    sink: EventSink,
}

impl BroadcastAck {
    pub(crate) fn new(broadcast: BroadcastId, sink: EventSink) -> Self {
        BroadcastAck { broadcast, sink }
    }

    pub fn broadcast(&self) -> BroadcastId {
        self.broadcast
    }

    pub fn complete(self) {
        self.sink.send(NodeEvent::BroadcastDone {
            peer: self.sink.peer,
            broadcast: self.broadcast,
        });
    }
}

impl fmt::Debug for BroadcastAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastAck")
            .field("broadcast", &self.broadcast)
            .field("peer", &self.sink.peer)
            .finish()
    }
}

/// Callback shared by every peer asked to close gracefully
pub type CloseCallback = Arc<dyn Fn(PeerId) + Send + Sync>;

/// Graceful-close notice handed to one peer unit
pub struct CloseNotice {
    peer: PeerId,
    callback: CloseCallback,
}

impl CloseNotice {
    pub(crate) fn new(peer: PeerId, callback: CloseCallback) -> Self {
        CloseNotice { peer, callback }
    }

    /// Report that this peer finished closing
    pub fn done(self) {
        (self.callback)(self.peer);
    }
}

impl fmt::Debug for CloseNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseNotice").field("peer", &self.peer).finish()
    }
}

/// Credentials offered when a session starts
#[derive(Debug, Clone, Copy)]
pub struct Handshake<'a> {
    pub feed_key: &'a FeedKey,
    pub private_key: &'a PrivateKey,
    pub chain: &'a Chain,
}

/// Secure duplex session
pub trait Transport: Send + 'static {
    /// Begin the handshake. Secure, chain-update and close notifications
    /// go to `events` from then on.
    fn start(&mut self, handshake: Handshake<'_>, events: EventSink) -> FeedResult<()>;
}

/// Replication protocol endpoint for one secured session
pub trait PeerUnit: Send + 'static {
    /// Ask the remote to stream content in `range`
    fn request(&mut self, range: &Range);

    /// Send `values` to the remote and complete `ack` when done
    fn broadcast(&mut self, values: &[Value], ack: BroadcastAck);

    /// Close gracefully, calling `notice.done()` when finished
    fn close(&mut self, notice: CloseNotice);

    /// Tear down immediately
    fn destroy(&mut self);
}

/// Everything a peer unit is bound to
pub struct PeerSetup {
    pub peer: PeerId,
    pub store: Arc<dyn ContentStore>,
    pub trust: Option<Arc<dyn TrustAuthority>>,
    pub full: bool,
    pub poll_interval: Duration,
    pub events: EventSink,
}

impl fmt::Debug for PeerSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSetup")
            .field("peer", &self.peer)
            .field("full", &self.full)
            .field("poll_interval", &self.poll_interval)
            .field("trust", &self.trust.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds peer units around secured transports
pub trait PeerFactory: Send + 'static {
    type Transport: Transport;
    type Peer: PeerUnit;

    fn create_peer(&mut self, transport: Self::Transport, setup: PeerSetup) -> Self::Peer;
}
