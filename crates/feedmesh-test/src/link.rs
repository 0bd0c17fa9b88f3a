//! In-memory links between nodes
//!
//! [`LinkTransport::pair`] returns the two ends of one session. Each end is
//! connected to a different node; the session secures once both ends have
//! started with the same feed key. [`LinkFactory`] turns each secured end
//! into a [`LinkPeer`] that replicates straight into the remote node's
//! event queue:
//!
//! - broadcasts are delivered as remote `values` and acknowledged at once
//! - range requests are served from the remote node's store
//! - in full mode the whole local store is offered when the peer starts
//! - a shorter chain offered by one end is announced to the other

use std::sync::Arc;

use parking_lot::Mutex;

use feedmesh_core::{Chain, FeedError, FeedKey, FeedResult, Range, Value};
use feedmesh_node::{
    BroadcastAck, CloseNotice, EventSink, Handshake, PeerFactory, PeerSetup, PeerUnit, Transport,
};
use feedmesh_store::ContentStore;

#[derive(Default)]
struct End {
    sink: Option<EventSink>,
    feed_key: Option<FeedKey>,
    chain: Chain,
    store: Option<Arc<dyn ContentStore>>,
    /// Ranges this end asked for before the remote store was known
    waiting: Vec<Range>,
}

#[derive(Default)]
struct LinkState {
    ends: [End; 2],
    secured: bool,
    closed: bool,
}

impl LinkState {
    fn remote(side: usize) -> usize {
        1 - side
    }

    /// Both ends started: secure them and exchange shorter chains
    fn try_secure(&mut self) {
        let [a, b] = &self.ends;
        let (Some(sink_a), Some(sink_b)) = (&a.sink, &b.sink) else {
            return;
        };
        if a.feed_key != b.feed_key {
            sink_a.error(FeedError::HandshakeFailed("feed key mismatch".into()));
            sink_b.error(FeedError::HandshakeFailed("feed key mismatch".into()));
            sink_a.closed();
            sink_b.closed();
            self.closed = true;
            return;
        }

        sink_a.secure();
        sink_b.secure();
        if b.chain.is_shorter_than(&a.chain) {
            sink_a.chain_update(b.chain.clone());
        }
        if a.chain.is_shorter_than(&b.chain) {
            sink_b.chain_update(a.chain.clone());
        }
        self.secured = true;
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for end in &self.ends {
            if let Some(sink) = &end.sink {
                sink.closed();
            }
        }
    }
}

/// One end of an in-memory session
pub struct LinkTransport {
    link: Arc<Mutex<LinkState>>,
    side: usize,
}

impl LinkTransport {
    /// Both ends of a new session
    pub fn pair() -> (LinkTransport, LinkTransport) {
        let link = Arc::new(Mutex::new(LinkState::default()));
        (
            LinkTransport {
                link: link.clone(),
                side: 0,
            },
            LinkTransport { link, side: 1 },
        )
    }

    pub fn is_secured(&self) -> bool {
        self.link.lock().secured
    }

    pub fn is_closed(&self) -> bool {
        self.link.lock().closed
    }

    /// Drop the session from the outside, as a network failure would
    pub fn sever(&self) {
        self.link.lock().shutdown();
    }
}

impl std::fmt::Debug for LinkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = self.link.lock();
        f.debug_struct("LinkTransport")
            .field("side", &self.side)
            .field("secured", &link.secured)
            .field("closed", &link.closed)
            .finish()
    }
}

impl Transport for LinkTransport {
    fn start(&mut self, handshake: Handshake<'_>, events: EventSink) -> FeedResult<()> {
        let mut link = self.link.lock();
        if link.closed {
            return Err(FeedError::TransportError("link closed".into()));
        }
        let end = &mut link.ends[self.side];
        if end.sink.is_some() {
            return Err(FeedError::HandshakeFailed("link end already started".into()));
        }
        end.sink = Some(events);
        end.feed_key = Some(*handshake.feed_key);
        end.chain = handshake.chain.clone();
        link.try_secure();
        Ok(())
    }
}

/// Peer unit replicating over a [`LinkTransport`]
pub struct LinkPeer {
    link: Arc<Mutex<LinkState>>,
    side: usize,
}

impl LinkPeer {
    fn local_sink(&self) -> Option<EventSink> {
        self.link.lock().ends[self.side].sink.clone()
    }
}

impl std::fmt::Debug for LinkPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkPeer").field("side", &self.side).finish()
    }
}

impl PeerUnit for LinkPeer {
    fn request(&mut self, range: &Range) {
        let mut link = self.link.lock();
        if link.closed {
            return;
        }
        let remote = &link.ends[LinkState::remote(self.side)];
        let Some(store) = remote.store.clone() else {
            link.ends[self.side].waiting.push(range.clone());
            return;
        };
        let values = store.request(range, None);
        if let (false, Some(sink)) = (values.is_empty(), &link.ends[self.side].sink) {
            sink.values(values);
        }
    }

    fn broadcast(&mut self, values: &[Value], ack: BroadcastAck) {
        let link = self.link.lock();
        if link.closed {
            // Never acknowledged: the send did not happen
            if let Some(sink) = &link.ends[self.side].sink {
                sink.error(FeedError::TransportError("broadcast on closed link".into()));
            }
            return;
        }
        if let Some(remote) = &link.ends[LinkState::remote(self.side)].sink {
            remote.values(values.to_vec());
        }
        drop(link);
        ack.complete();
    }

    fn close(&mut self, notice: CloseNotice) {
        self.link.lock().shutdown();
        notice.done();
    }

    fn destroy(&mut self) {
        self.link.lock().shutdown();
        if let Some(sink) = self.local_sink() {
            tracing::trace!(peer = %sink.peer(), "link peer destroyed");
        }
    }
}

/// Builds [`LinkPeer`]s around secured [`LinkTransport`]s
#[derive(Debug, Default)]
pub struct LinkFactory {
    created: usize,
}

impl LinkFactory {
    pub fn new() -> Self {
        LinkFactory::default()
    }

    /// Peer units built so far
    pub fn created(&self) -> usize {
        self.created
    }
}

impl PeerFactory for LinkFactory {
    type Transport = LinkTransport;
    type Peer = LinkPeer;

    fn create_peer(&mut self, transport: LinkTransport, setup: PeerSetup) -> LinkPeer {
        self.created += 1;
        let side = transport.side;
        let remote = LinkState::remote(side);

        {
            let mut link = transport.link.lock();
            link.ends[side].store = Some(setup.store.clone());

            // Serve what the remote asked for before this store existed
            let waiting = std::mem::take(&mut link.ends[remote].waiting);
            if let Some(sink) = &link.ends[remote].sink {
                for range in &waiting {
                    let values = setup.store.request(range, None);
                    if !values.is_empty() {
                        sink.values(values);
                    }
                }
                if setup.full {
                    let values = setup.store.request(&Range::full(), None);
                    if !values.is_empty() {
                        sink.values(values);
                    }
                }
            }
        }

        LinkPeer {
            link: transport.link,
            side,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedmesh_core::{ChainLink, FeedIdentity};
    use feedmesh_node::{Node, NodeConfig};

    fn pair_of_nodes(config: NodeConfig) -> (Node<LinkFactory>, Node<LinkFactory>) {
        (
            Node::new(config.clone(), LinkFactory::new()).unwrap(),
            Node::new(config, LinkFactory::new()).unwrap(),
        )
    }

    fn settle(a: &mut Node<LinkFactory>, b: &mut Node<LinkFactory>) {
        for _ in 0..64 {
            if a.tick() + b.tick() == 0 {
                break;
            }
        }
    }

    #[test]
    fn test_link_secures_once_both_ends_start() {
        let (mut a, mut b) = pair_of_nodes(NodeConfig::from_identity(&FeedIdentity::generate()));
        let (left, right) = LinkTransport::pair();

        a.connect(left);
        settle(&mut a, &mut b);
        assert_eq!(a.peer_count(), 0);
        assert_eq!(a.factory().created(), 0);

        b.connect(right);
        settle(&mut a, &mut b);
        assert_eq!(a.peer_count(), 1);
        assert_eq!(b.peer_count(), 1);
        assert_eq!(a.factory().created(), 1);
        assert_eq!(b.factory().created(), 1);
    }

    #[test]
    fn test_link_rejects_foreign_feed() {
        let mut a = Node::new(
            NodeConfig::from_identity(&FeedIdentity::generate()),
            LinkFactory::new(),
        )
        .unwrap();
        let mut b = Node::new(
            NodeConfig::from_identity(&FeedIdentity::generate()),
            LinkFactory::new(),
        )
        .unwrap();
        let (left, right) = LinkTransport::pair();

        a.connect(left);
        b.connect(right);
        settle(&mut a, &mut b);

        assert_eq!(a.peer_count(), 0);
        assert_eq!(b.peer_count(), 0);
        assert_eq!(a.stats().peer_errors, 1);
    }

    #[test]
    fn test_shorter_chain_crosses_link() {
        let identity = FeedIdentity::generate();
        let chain = |len: usize| -> Chain { (0..len).map(|i| ChainLink::new(vec![i as u8])).collect() };
        let mut a = Node::new(
            NodeConfig::from_identity(&identity).with_chain(chain(2)),
            LinkFactory::new(),
        )
        .unwrap();
        let mut b = Node::new(
            NodeConfig::from_identity(&identity).with_chain(chain(4)),
            LinkFactory::new(),
        )
        .unwrap();
        let (left, right) = LinkTransport::pair();

        a.connect(left);
        b.connect(right);
        settle(&mut a, &mut b);

        assert_eq!(a.chain().len(), 2);
        assert_eq!(b.chain().len(), 2);
    }

    #[test]
    fn test_full_peers_exchange_existing_content() {
        let (mut a, mut b) = pair_of_nodes(NodeConfig::from_identity(&FeedIdentity::generate()));
        a.insert(Value::from("from-a")).unwrap();
        b.insert(Value::from("from-b")).unwrap();

        let (left, right) = LinkTransport::pair();
        a.connect(left);
        b.connect(right);
        settle(&mut a, &mut b);

        for node in [&a, &b] {
            assert!(node.has(&Value::from("from-a")));
            assert!(node.has(&Value::from("from-b")));
        }
    }

    #[test]
    fn test_closing_one_side_removes_both_peers() {
        let (mut a, mut b) = pair_of_nodes(NodeConfig::from_identity(&FeedIdentity::generate()));
        let (left, right) = LinkTransport::pair();
        a.connect(left);
        b.connect(right);
        settle(&mut a, &mut b);

        let closed = Arc::new(Mutex::new(Vec::new()));
        let seen = closed.clone();
        assert_eq!(a.close(move |peer| seen.lock().push(peer)), 1);
        settle(&mut a, &mut b);

        assert_eq!(closed.lock().len(), 1);
        assert_eq!(a.peer_count(), 0);
        assert_eq!(b.peer_count(), 0);
    }
}
