//! feedmesh Node - coordination core
//!
//! The node owns the peer set, the watcher set, the current trust chain and
//! the queue of callers waiting for a first peer. Everything asynchronous
//! arrives as a [`NodeEvent`] on one channel and is handled by [`Node::tick`],
//! one event-loop iteration at a time:
//!
//! 1. Run work deferred by the previous iteration
//! 2. Drain and handle queued events
//!
//! Callbacks that must look asynchronous are always deferred, never called
//! from inside the call that registered them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use feedmesh_core::{
    BroadcastId, Chain, FeedId, FeedKey, FeedResult, PeerId, Range, Value, WatcherId,
};
use feedmesh_store::{ContentStore, MemoryStore};

use crate::{
    BroadcastAck, CloseCallback, CloseNotice, Completion, CompletionLatch, EventSink, Handshake,
    InsertOptions, NodeConfig, NodeEvent, PeerFactory, PeerSetup, PeerUnit, Subscription,
    Transport, TrustAuthority, Watcher,
};

/// Upper bound on ticks spent by [`Node::run_until_idle`]
const MAX_IDLE_TICKS: usize = 1024;

/// Called with the peer count once at least one peer is connected
pub type PeersCallback = Box<dyn FnOnce(usize) + Send>;

#[derive(Clone, Debug, Default)]
pub struct NodeStats {
    pub ticks: u64,
    pub events_handled: u64,
    pub values_accepted: u64,
    pub duplicates_dropped: u64,
    pub malformed_dropped: u64,
    pub broadcasts_started: u64,
    pub broadcasts_completed: u64,
    pub peers_connected: u64,
    pub peers_closed: u64,
    pub handshake_failures: u64,
    pub peer_errors: u64,
    pub chain_announcements: u64,
    pub chain_adoptions: u64,
    pub watcher_pushes: u64,
}

/// Work scheduled for the next event-loop iteration
enum Deferred {
    PeersAvailable(Vec<PeersCallback>),
    Complete(Completion, Vec<Value>),
}

/// feedmesh Node - the replication coordinator
pub struct Node<F: PeerFactory> {
    config: NodeConfig,
    feed_id: FeedId,
    /// Shortest known trust chain
    chain: Chain,
    store: Arc<dyn ContentStore>,
    trust: Option<Arc<dyn TrustAuthority>>,
    factory: F,
    /// Transports still handshaking
    connecting: HashMap<PeerId, F::Transport>,
    /// Secured peers, iterated in connect order
    peers: BTreeMap<PeerId, F::Peer>,
    watchers: BTreeMap<WatcherId, Watcher>,
    /// Callers waiting for the first peer
    pending_connection: Vec<PeersCallback>,
    /// Outstanding broadcast completions
    broadcasts: HashMap<BroadcastId, CompletionLatch>,
    deferred: VecDeque<Deferred>,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    events_rx: mpsc::UnboundedReceiver<NodeEvent>,
    next_peer: u64,
    next_watcher: u64,
    next_broadcast: u64,
    stats: NodeStats,
}

impl<F: PeerFactory> Node<F> {
    /// Create a node with a fresh in-memory store and no trust authority
    pub fn new(config: NodeConfig, factory: F) -> FeedResult<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Node {
            feed_id: config.feed_key.feed_id(),
            chain: config.chain.clone(),
            config,
            store: Arc::new(MemoryStore::new()),
            trust: None,
            factory,
            connecting: HashMap::new(),
            peers: BTreeMap::new(),
            watchers: BTreeMap::new(),
            pending_connection: Vec::new(),
            broadcasts: HashMap::new(),
            deferred: VecDeque::new(),
            events_tx,
            events_rx,
            next_peer: 0,
            next_watcher: 0,
            next_broadcast: 0,
            stats: NodeStats::default(),
        })
    }

    /// Use an injected content store
    pub fn with_storage(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = store;
        self
    }

    /// Forward chain announcements to `trust`
    pub fn with_trust(mut self, trust: Arc<dyn TrustAuthority>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn feed_key(&self) -> &FeedKey {
        &self.config.feed_key
    }

    pub fn feed_id(&self) -> FeedId {
        self.feed_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current (shortest known) trust chain
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn is_full(&self) -> bool {
        self.config.full
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Connected peers in connect order
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peer(&self, peer: PeerId) -> Option<&F::Peer> {
        self.peers.get(&peer)
    }

    /// Transports that have not finished their handshake
    pub fn connecting_count(&self) -> usize {
        self.connecting.len()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Broadcasts whose completion has not fired yet
    pub fn pending_broadcasts(&self) -> usize {
        self.broadcasts.len()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    // ========================================================================
    // CONNECTION LIFECYCLE
    // ========================================================================

    /// Register a new transport and start its handshake.
    ///
    /// The peer joins the peer set once the transport reports `secure`. A
    /// handshake that fails to start is logged and the transport dropped;
    /// the returned id is then never used again.
    pub fn connect(&mut self, mut transport: F::Transport) -> PeerId {
        let peer = PeerId::new(self.next_peer);
        self.next_peer += 1;

        let handshake = Handshake {
            feed_key: &self.config.feed_key,
            private_key: &self.config.private_key,
            chain: &self.chain,
        };
        let events = EventSink::new(peer, self.events_tx.clone());

        match transport.start(handshake, events) {
            Ok(()) => {
                tracing::debug!(feed = %self.feed_id, peer = %peer, "handshake started");
                self.connecting.insert(peer, transport);
            }
            Err(e) => {
                self.stats.handshake_failures += 1;
                tracing::warn!(feed = %self.feed_id, peer = %peer, error = %e, "handshake failed");
            }
        }
        peer
    }

    /// Ask every peer to close gracefully.
    ///
    /// `on_closed` runs once per peer as each finishes, not once overall;
    /// with no peers it never runs. Returns how many peers were asked.
    pub fn close<C>(&mut self, on_closed: C) -> usize
    where
        C: Fn(PeerId) + Send + Sync + 'static,
    {
        let callback: CloseCallback = Arc::new(on_closed);
        for (&peer, unit) in self.peers.iter_mut() {
            unit.close(CloseNotice::new(peer, callback.clone()));
        }
        tracing::debug!(feed = %self.feed_id, peers = self.peers.len(), "closing peers");
        self.peers.len()
    }

    /// Destroy every peer unit now.
    ///
    /// Every callback still waiting is dropped without running: broadcast
    /// completions, latched or deferred, and peers-available callbacks,
    /// queued or deferred. The node stays usable afterwards.
    pub fn destroy(&mut self) {
        let peers = std::mem::take(&mut self.peers);
        let count = peers.len();
        for (_, mut unit) in peers {
            unit.destroy();
        }
        self.connecting.clear();

        let dropped = self.broadcasts.len() + self.deferred.len() + self.pending_connection.len();
        self.broadcasts.clear();
        self.deferred.clear();
        self.pending_connection.clear();
        tracing::debug!(feed = %self.feed_id, peers = count, dropped, "node destroyed");
    }

    /// Run `callback` with the peer count on a later tick once at least one
    /// peer is connected. Never runs inside this call.
    pub fn on_peers_available<C>(&mut self, callback: C)
    where
        C: FnOnce(usize) + Send + 'static,
    {
        let callback: PeersCallback = Box::new(callback);
        if self.peers.is_empty() {
            self.pending_connection.push(callback);
        } else {
            self.deferred
                .push_back(Deferred::PeersAvailable(vec![callback]));
        }
    }

    // ========================================================================
    // STORE ACCESS
    // ========================================================================

    pub fn has(&self, value: &Value) -> bool {
        self.store.has(value)
    }

    pub fn request(&self, range: &Range, limit: Option<usize>) -> Vec<Value> {
        self.store.request(range, limit)
    }

    // ========================================================================
    // INSERTION
    // ========================================================================

    /// Insert one value; `true` if it was new
    pub fn insert(&mut self, value: Value) -> FeedResult<bool> {
        let accepted = self.insert_batch(vec![value], InsertOptions::default(), None)?;
        Ok(!accepted.is_empty())
    }

    /// Insert one value and run `on_done` once the broadcast completes
    pub fn insert_with<C>(
        &mut self,
        value: Value,
        options: InsertOptions,
        on_done: C,
    ) -> FeedResult<bool>
    where
        C: FnOnce(Vec<Value>) + Send + 'static,
    {
        let accepted = self.insert_batch(vec![value], options, Some(Box::new(on_done)))?;
        Ok(!accepted.is_empty())
    }

    /// Insert a batch; returns the values that were new
    pub fn bulk_insert(&mut self, values: Vec<Value>) -> FeedResult<Vec<Value>> {
        self.insert_batch(values, InsertOptions::default(), None)
    }

    /// Insert a batch and run `on_done` once the broadcast completes
    pub fn bulk_insert_with<C>(
        &mut self,
        values: Vec<Value>,
        options: InsertOptions,
        on_done: C,
    ) -> FeedResult<Vec<Value>>
    where
        C: FnOnce(Vec<Value>) + Send + 'static,
    {
        self.insert_batch(values, options, Some(Box::new(on_done)))
    }

    pub(crate) fn insert_batch(
        &mut self,
        values: Vec<Value>,
        options: InsertOptions,
        completion: Option<Completion>,
    ) -> FeedResult<Vec<Value>> {
        for value in &values {
            value.check(self.config.max_value_size)?;
        }
        Ok(self.accept(&values, None, options, completion))
    }

    /// Store `values` and fan out whatever was new
    fn accept(
        &mut self,
        values: &[Value],
        origin: Option<PeerId>,
        options: InsertOptions,
        completion: Option<Completion>,
    ) -> Vec<Value> {
        let accepted = self.store.bulk_insert(values);
        self.stats.values_accepted += accepted.len() as u64;
        self.stats.duplicates_dropped += values.len().saturating_sub(accepted.len()) as u64;

        if accepted.is_empty() {
            if let Some(completion) = completion {
                self.deferred
                    .push_back(Deferred::Complete(completion, Vec::new()));
            }
            return accepted;
        }

        self.broadcast(&accepted, origin, options, completion);
        accepted
    }

    // ========================================================================
    // BROADCAST FAN-OUT
    // ========================================================================

    /// Send `values` to every peer but `origin`, then to every watcher.
    ///
    /// The completion fires once `options.threshold(sent)` peers have
    /// acknowledged. The threshold only caps what is waited for: every
    /// eligible peer is still sent the values.
    fn broadcast(
        &mut self,
        values: &[Value],
        origin: Option<PeerId>,
        options: InsertOptions,
        completion: Option<Completion>,
    ) {
        let broadcast = BroadcastId(self.next_broadcast);
        self.next_broadcast += 1;

        let mut initiated = 0;
        for (&peer, unit) in self.peers.iter_mut() {
            if origin == Some(peer) {
                continue;
            }
            let sink = EventSink::new(peer, self.events_tx.clone());
            unit.broadcast(values, BroadcastAck::new(broadcast, sink));
            initiated += 1;
        }
        self.stats.broadcasts_started += 1;

        let threshold = options.threshold(initiated);
        tracing::trace!(
            feed = %self.feed_id,
            ?broadcast,
            values = values.len(),
            peers = initiated,
            threshold,
            "broadcast started"
        );

        if let Some(completion) = completion {
            if threshold == 0 {
                self.deferred
                    .push_back(Deferred::Complete(completion, values.to_vec()));
            } else {
                self.broadcasts.insert(
                    broadcast,
                    CompletionLatch::new(threshold, values.to_vec(), completion),
                );
            }
        }

        self.push_to_watchers(values);
    }

    fn push_to_watchers(&mut self, values: &[Value]) {
        let mut abandoned = Vec::new();
        for (&id, watcher) in &self.watchers {
            match watcher.push(values) {
                Some(delivered) => self.stats.watcher_pushes += delivered as u64,
                None => abandoned.push(id),
            }
        }
        for id in abandoned {
            self.watchers.remove(&id);
            tracing::debug!(feed = %self.feed_id, watcher = %id, "subscription dropped, watcher removed");
        }
    }

    // ========================================================================
    // WATCH / UNWATCH
    // ========================================================================

    /// Open a watch on `range`.
    ///
    /// The subscription first receives every stored match, then every
    /// later accepted value in range until [`Node::unwatch`].
    pub fn watch(&mut self, range: Range) -> Subscription {
        let id = WatcherId::new(self.next_watcher);
        self.next_watcher += 1;

        let (watcher, subscription) = Watcher::open(id, range.clone());
        let backlog = self.store.request(&range, None);
        self.watchers.insert(id, watcher);

        if !self.config.full {
            for unit in self.peers.values_mut() {
                unit.request(&range);
            }
        }

        let delivered = self.watchers.get(&id).and_then(|w| w.push(&backlog));
        self.stats.watcher_pushes += delivered.unwrap_or(0) as u64;
        tracing::debug!(
            feed = %self.feed_id,
            watcher = %id,
            ?range,
            backlog = backlog.len(),
            "watch opened"
        );

        subscription
    }

    /// Stop pushing to a watcher; `false` if it was already gone
    pub fn unwatch(&mut self, watcher: WatcherId) -> bool {
        let removed = self.watchers.remove(&watcher).is_some();
        if removed {
            tracing::debug!(feed = %self.feed_id, watcher = %watcher, "watch closed");
        }
        removed
    }

    /// Drop watchers whose subscription is gone
    pub fn prune_watchers(&mut self) -> usize {
        let before = self.watchers.len();
        self.watchers.retain(|_, watcher| !watcher.is_abandoned());
        before - self.watchers.len()
    }

    // ========================================================================
    // EVENT LOOP
    // ========================================================================

    /// One event-loop iteration; returns the amount of work done
    pub fn tick(&mut self) -> usize {
        let mut work = self.begin_tick();
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            work += 1;
        }
        work
    }

    /// Tick until nothing is left to do
    pub fn run_until_idle(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_IDLE_TICKS {
            let work = self.tick();
            if work == 0 {
                break;
            }
            total += work;
        }
        total
    }

    /// Start an iteration: run everything deferred before it
    pub(crate) fn begin_tick(&mut self) -> usize {
        self.stats.ticks += 1;
        let due = std::mem::take(&mut self.deferred);
        let count = due.len();
        for task in due {
            match task {
                Deferred::PeersAvailable(callbacks) => {
                    let peers = self.peers.len();
                    for callback in callbacks {
                        callback(peers);
                    }
                }
                Deferred::Complete(completion, values) => {
                    self.stats.broadcasts_completed += 1;
                    completion(values);
                }
            }
        }
        count
    }

    pub(crate) async fn recv_event(&mut self) -> Option<NodeEvent> {
        self.events_rx.recv().await
    }

    pub(crate) fn handle_event(&mut self, event: NodeEvent) {
        self.stats.events_handled += 1;
        match event {
            NodeEvent::Secure { peer } => self.on_secure(peer),
            NodeEvent::ChainUpdate { peer, chain } => self.reconcile_chain(peer, chain),
            NodeEvent::Values { peer, values } => self.on_values(peer, values),
            NodeEvent::BroadcastDone { peer, broadcast } => {
                self.on_broadcast_done(peer, broadcast)
            }
            NodeEvent::PeerError { peer, error } => {
                self.stats.peer_errors += 1;
                tracing::warn!(feed = %self.feed_id, peer = %peer, error = %error, "peer error");
            }
            NodeEvent::Closed { peer } => self.on_closed(peer),
        }
    }

    fn on_secure(&mut self, peer: PeerId) {
        let Some(transport) = self.connecting.remove(&peer) else {
            tracing::trace!(feed = %self.feed_id, peer = %peer, "secure for unknown connection");
            return;
        };

        let setup = PeerSetup {
            peer,
            store: self.store.clone(),
            trust: self.trust.clone(),
            full: self.config.full,
            poll_interval: self.config.poll_interval,
            events: EventSink::new(peer, self.events_tx.clone()),
        };
        let unit = self.factory.create_peer(transport, setup);
        self.peers.insert(peer, unit);
        self.stats.peers_connected += 1;

        if !self.config.full {
            if let Some(unit) = self.peers.get_mut(&peer) {
                for watcher in self.watchers.values() {
                    unit.request(watcher.range());
                }
            }
        }

        tracing::debug!(feed = %self.feed_id, peer = %peer, peers = self.peers.len(), "peer connected");

        if !self.pending_connection.is_empty() {
            let waiting = std::mem::take(&mut self.pending_connection);
            self.deferred.push_back(Deferred::PeersAvailable(waiting));
        }
    }

    /// Keep the shortest chain; report every announcement to the authority
    fn reconcile_chain(&mut self, peer: PeerId, chain: Chain) {
        if !self.peers.contains_key(&peer) && !self.connecting.contains_key(&peer) {
            tracing::trace!(feed = %self.feed_id, peer = %peer, "chain from unknown peer ignored");
            return;
        }
        self.stats.chain_announcements += 1;

        if chain.is_shorter_than(&self.chain) {
            tracing::info!(
                feed = %self.feed_id,
                peer = %peer,
                from = self.chain.len(),
                to = chain.len(),
                "adopting shorter trust chain"
            );
            self.chain = chain.clone();
            self.stats.chain_adoptions += 1;
        }

        if let Some(trust) = &self.trust {
            trust.add_chain(&self.config.feed_key, &chain);
        }
    }

    /// Content pushed by a peer goes through the store like a local insert,
    /// with that peer excluded from the fan-out
    fn on_values(&mut self, peer: PeerId, values: Vec<Value>) {
        if !self.peers.contains_key(&peer) {
            tracing::trace!(feed = %self.feed_id, peer = %peer, "values from unknown peer ignored");
            return;
        }

        let limit = self.config.max_value_size;
        let offered = values.len();
        let valid: Vec<Value> = values
            .into_iter()
            .filter(|value| value.check(limit).is_ok())
            .collect();
        if valid.len() < offered {
            let dropped = offered - valid.len();
            self.stats.malformed_dropped += dropped as u64;
            tracing::warn!(feed = %self.feed_id, peer = %peer, dropped, "malformed values dropped");
        }
        if valid.is_empty() {
            return;
        }

        self.accept(&valid, Some(peer), InsertOptions::default(), None);
    }

    fn on_broadcast_done(&mut self, peer: PeerId, broadcast: BroadcastId) {
        let Some(latch) = self.broadcasts.get_mut(&broadcast) else {
            tracing::trace!(feed = %self.feed_id, peer = %peer, ?broadcast, "late acknowledgement");
            return;
        };
        if let Some((completion, values)) = latch.count_down() {
            self.broadcasts.remove(&broadcast);
            self.stats.broadcasts_completed += 1;
            completion(values);
        }
    }

    fn on_closed(&mut self, peer: PeerId) {
        if let Some(mut unit) = self.peers.remove(&peer) {
            unit.destroy();
            self.stats.peers_closed += 1;
            tracing::debug!(feed = %self.feed_id, peer = %peer, peers = self.peers.len(), "peer closed");
        } else if self.connecting.remove(&peer).is_some() {
            tracing::debug!(feed = %self.feed_id, peer = %peer, "connection closed during handshake");
        }
    }
}

impl<F: PeerFactory> fmt::Debug for Node<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("feed", &self.feed_id)
            .field("full", &self.config.full)
            .field("chain", &self.chain)
            .field("peers", &self.peers.len())
            .field("connecting", &self.connecting.len())
            .field("watchers", &self.watchers.len())
            .finish_non_exhaustive()
    }
}
