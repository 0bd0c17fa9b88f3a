//! Recording peer units
//!
//! [`ProbeFactory`] wraps every secured [`SimTransport`] in a [`ProbePeer`]
//! that only records what the node asked of it. The shared [`ProbeLog`]
//! lets a test inspect those calls, acknowledge broadcasts by hand and
//! inject content as if the remote had pushed it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use feedmesh_core::{Chain, PeerId, Range, Value};
use feedmesh_node::{BroadcastAck, CloseNotice, EventSink, PeerFactory, PeerSetup, PeerUnit};

use crate::SimTransport;

/// Everything the node asked of one peer
#[derive(Debug)]
struct PeerRecord {
    sink: EventSink,
    full: bool,
    requests: Vec<Range>,
    broadcasts: Vec<Vec<Value>>,
    pending_acks: Vec<BroadcastAck>,
    close_requested: bool,
    destroyed: bool,
}

/// Shared view of every probe peer a factory created
#[derive(Clone, Debug, Default)]
pub struct ProbeLog {
    peers: Arc<Mutex<BTreeMap<PeerId, PeerRecord>>>,
}

impl ProbeLog {
    fn register(&self, setup: &PeerSetup) {
        self.peers.lock().insert(
            setup.peer,
            PeerRecord {
                sink: setup.events.clone(),
                full: setup.full,
                requests: Vec::new(),
                broadcasts: Vec::new(),
                pending_acks: Vec::new(),
                close_requested: false,
                destroyed: false,
            },
        );
    }

    fn with<T>(&self, peer: PeerId, f: impl FnOnce(&mut PeerRecord) -> T) -> Option<T> {
        self.peers.lock().get_mut(&peer).map(f)
    }

    /// Every peer unit created so far, destroyed ones included
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.lock().keys().copied().collect()
    }

    /// Replication mode the peer was built for
    pub fn is_full(&self, peer: PeerId) -> Option<bool> {
        self.with(peer, |record| record.full)
    }

    pub fn requests(&self, peer: PeerId) -> Vec<Range> {
        self.with(peer, |record| record.requests.clone())
            .unwrap_or_default()
    }

    /// Broadcast batches in the order they were sent
    pub fn broadcasts(&self, peer: PeerId) -> Vec<Vec<Value>> {
        self.with(peer, |record| record.broadcasts.clone())
            .unwrap_or_default()
    }

    /// Every value broadcast to `peer`, flattened
    pub fn received(&self, peer: PeerId) -> Vec<Value> {
        self.broadcasts(peer).into_iter().flatten().collect()
    }

    pub fn pending_acks(&self, peer: PeerId) -> usize {
        self.with(peer, |record| record.pending_acks.len())
            .unwrap_or(0)
    }

    /// Acknowledge the oldest outstanding broadcast to `peer`
    pub fn ack_next(&self, peer: PeerId) -> bool {
        let ack = self.with(peer, |record| {
            if record.pending_acks.is_empty() {
                None
            } else {
                Some(record.pending_acks.remove(0))
            }
        });
        match ack.flatten() {
            Some(ack) => {
                ack.complete();
                true
            }
            None => false,
        }
    }

    /// Acknowledge every outstanding broadcast to `peer`
    pub fn ack_all(&self, peer: PeerId) -> usize {
        let acks = self
            .with(peer, |record| std::mem::take(&mut record.pending_acks))
            .unwrap_or_default();
        let count = acks.len();
        for ack in acks {
            ack.complete();
        }
        count
    }

    /// Forget the outstanding broadcasts to `peer` without acknowledging
    pub fn stall(&self, peer: PeerId) -> usize {
        self.with(peer, |record| std::mem::take(&mut record.pending_acks).len())
            .unwrap_or(0)
    }

    /// Push content from the remote side of `peer`
    pub fn push(&self, peer: PeerId, values: Vec<Value>) -> bool {
        self.with(peer, |record| record.sink.values(values)).is_some()
    }

    /// Announce a trust chain from the remote side of `peer`
    pub fn announce_chain(&self, peer: PeerId, chain: Chain) -> bool {
        self.with(peer, |record| record.sink.chain_update(chain))
            .is_some()
    }

    pub fn close_requested(&self, peer: PeerId) -> bool {
        self.with(peer, |record| record.close_requested)
            .unwrap_or(false)
    }

    pub fn is_destroyed(&self, peer: PeerId) -> bool {
        self.with(peer, |record| record.destroyed).unwrap_or(false)
    }
}

/// Peer unit that records instead of replicating
#[derive(Debug)]
pub struct ProbePeer {
    id: PeerId,
    log: ProbeLog,
    auto_ack: bool,
    transport: SimTransport,
}

impl ProbePeer {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn transport(&self) -> &SimTransport {
        &self.transport
    }
}

impl PeerUnit for ProbePeer {
    fn request(&mut self, range: &Range) {
        self.log.with(self.id, |record| record.requests.push(range.clone()));
    }

    fn broadcast(&mut self, values: &[Value], ack: BroadcastAck) {
        let auto_ack = self.auto_ack;
        let ack = self
            .log
            .with(self.id, |record| {
                record.broadcasts.push(values.to_vec());
                if auto_ack {
                    Some(ack)
                } else {
                    record.pending_acks.push(ack);
                    None
                }
            })
            .flatten();
        if let Some(ack) = ack {
            ack.complete();
        }
    }

    /// Closes at once: reports done, then the session close
    fn close(&mut self, notice: CloseNotice) {
        let sink = self.log.with(self.id, |record| {
            record.close_requested = true;
            record.sink.clone()
        });
        notice.done();
        if let Some(sink) = sink {
            sink.closed();
        }
    }

    fn destroy(&mut self) {
        self.log.with(self.id, |record| {
            record.destroyed = true;
            record.pending_acks.clear();
        });
    }
}

/// Builds [`ProbePeer`]s around [`SimTransport`]s
#[derive(Debug, Default)]
pub struct ProbeFactory {
    log: ProbeLog,
    auto_ack: bool,
}

impl ProbeFactory {
    /// Probes that hold every acknowledgement until the test releases it
    pub fn new() -> Self {
        ProbeFactory::default()
    }

    /// Probes that acknowledge each broadcast as soon as they record it
    pub fn auto_ack() -> Self {
        ProbeFactory {
            log: ProbeLog::default(),
            auto_ack: true,
        }
    }

    pub fn log(&self) -> ProbeLog {
        self.log.clone()
    }
}

impl PeerFactory for ProbeFactory {
    type Transport = SimTransport;
    type Peer = ProbePeer;

    fn create_peer(&mut self, transport: SimTransport, setup: PeerSetup) -> ProbePeer {
        self.log.register(&setup);
        tracing::trace!(peer = %setup.peer, full = setup.full, "probe peer created");
        ProbePeer {
            id: setup.peer,
            log: self.log.clone(),
            auto_ack: self.auto_ack,
            transport,
        }
    }
}
