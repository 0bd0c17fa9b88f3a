//! Test harness
//!
//! [`TestNode`] owns a node together with its identity and a recording
//! trust ledger. [`Mesh`] runs several linked nodes of one feed in lockstep.
//! [`Calls`] records callback invocations for later assertions.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use feedmesh_core::{FeedIdentity, PeerId};
use feedmesh_node::{Node, NodeConfig, PeerFactory, TrustLedger};

use crate::{LinkFactory, LinkTransport, ProbeFactory, ProbeLog, SimTransport, TransportControl};

/// Upper bound on lockstep rounds in [`Mesh::settle`]
const MAX_ROUNDS: usize = 256;

/// A node plus the pieces a test wants to inspect
pub struct TestNode<F: PeerFactory> {
    node: Node<F>,
    identity: Arc<FeedIdentity>,
    ledger: Arc<TrustLedger>,
}

impl<F: PeerFactory> TestNode<F> {
    /// Build a node for `identity`, adjusting its config with `configure`
    pub fn build(
        identity: Arc<FeedIdentity>,
        factory: F,
        configure: impl FnOnce(NodeConfig) -> NodeConfig,
    ) -> Self {
        let config = configure(NodeConfig::from_identity(&identity));
        let ledger = Arc::new(TrustLedger::new());
        let node = match Node::new(config, factory) {
            Ok(node) => node.with_trust(ledger.clone()),
            Err(e) => panic!("test node config rejected: {e}"),
        };
        TestNode {
            node,
            identity,
            ledger,
        }
    }

    pub fn identity(&self) -> &FeedIdentity {
        &self.identity
    }

    /// Every chain this node forwarded to its trust authority
    pub fn ledger(&self) -> &TrustLedger {
        &self.ledger
    }

    /// Tick until idle; returns the work done
    pub fn settle(&mut self) -> usize {
        self.node.run_until_idle()
    }

    pub fn into_inner(self) -> Node<F> {
        self.node
    }
}

impl TestNode<ProbeFactory> {
    /// Full-mode node over probe peers that hold their acknowledgements
    pub fn probe() -> Self {
        Self::probe_with(ProbeFactory::new(), |config| config)
    }

    pub fn probe_with(
        factory: ProbeFactory,
        configure: impl FnOnce(NodeConfig) -> NodeConfig,
    ) -> Self {
        Self::build(Arc::new(FeedIdentity::generate()), factory, configure)
    }

    pub fn log(&self) -> ProbeLog {
        self.node.factory().log()
    }

    /// Connect a transport and complete its handshake
    pub fn join(&mut self) -> (PeerId, TransportControl) {
        let (transport, control) = SimTransport::secured();
        let peer = self.node.connect(transport);
        self.settle();
        (peer, control)
    }
}

impl<F: PeerFactory> Deref for TestNode<F> {
    type Target = Node<F>;

    fn deref(&self) -> &Node<F> {
        &self.node
    }
}

impl<F: PeerFactory> DerefMut for TestNode<F> {
    fn deref_mut(&mut self) -> &mut Node<F> {
        &mut self.node
    }
}

/// Linked nodes replicating one feed
pub struct Mesh {
    nodes: Vec<TestNode<LinkFactory>>,
}

impl Mesh {
    /// `count` full-mode nodes of a fresh feed, not yet linked
    pub fn new(count: usize) -> Self {
        Self::with_config(count, |_, config| config)
    }

    /// Like [`Mesh::new`], with `configure` called per node index
    pub fn with_config(count: usize, configure: impl Fn(usize, NodeConfig) -> NodeConfig) -> Self {
        let identity = Arc::new(FeedIdentity::generate());
        let nodes = (0..count)
            .map(|i| TestNode::build(identity.clone(), LinkFactory::new(), |c| configure(i, c)))
            .collect();
        Mesh { nodes }
    }

    /// Open a session between nodes `a` and `b`
    pub fn link(&mut self, a: usize, b: usize) -> (PeerId, PeerId) {
        let (left, right) = LinkTransport::pair();
        let on_a = self.nodes[a].connect(left);
        let on_b = self.nodes[b].connect(right);
        (on_a, on_b)
    }

    /// Link every node to the next one
    pub fn line(&mut self) {
        for i in 1..self.nodes.len() {
            self.link(i - 1, i);
        }
    }

    /// Tick every node in turn until none has work left
    pub fn settle(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_ROUNDS {
            let work: usize = self.nodes.iter_mut().map(|node| node.tick()).sum();
            if work == 0 {
                break;
            }
            total += work;
        }
        total
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &TestNode<LinkFactory> {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut TestNode<LinkFactory> {
        &mut self.nodes[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestNode<LinkFactory>> {
        self.nodes.iter()
    }
}

/// Shared record of callback arguments
pub struct Calls<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Calls<T> {
    fn clone(&self) -> Self {
        Calls {
            seen: self.seen.clone(),
        }
    }
}

impl<T> Default for Calls<T> {
    fn default() -> Self {
        Calls {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Calls<T> {
    pub fn new() -> Self {
        Calls::default()
    }

    pub fn record(&self, value: T) {
        self.seen.lock().push(value);
    }

    /// Callback for a single invocation
    pub fn once(&self) -> impl FnOnce(T) + Send + 'static {
        let calls = self.clone();
        move |value| calls.record(value)
    }

    /// Callback for repeated invocations
    pub fn each(&self) -> impl Fn(T) + Send + Sync + 'static {
        let calls = self.clone();
        move |value| calls.record(value)
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn all(&self) -> Vec<T> {
        self.seen.lock().clone()
    }

    pub fn last(&self) -> Option<T> {
        self.seen.lock().last().cloned()
    }
}
