//! Manually driven transport
//!
//! A [`SimTransport`] does nothing on its own. The test keeps the matching
//! [`TransportControl`] and decides when the session secures, what chain
//! the remote announces, and when it fails or closes.

use std::sync::Arc;

use parking_lot::Mutex;

use feedmesh_core::{Chain, FeedError, FeedKey, FeedResult, PeerId};
use feedmesh_node::{EventSink, Handshake, Transport};

#[derive(Debug, Default)]
struct ControlState {
    sink: Option<EventSink>,
    feed_key: Option<FeedKey>,
    offered_chain: Option<Chain>,
}

/// Test-side handle of a [`SimTransport`]
#[derive(Clone, Debug, Default)]
pub struct TransportControl {
    state: Arc<Mutex<ControlState>>,
}

impl TransportControl {
    /// Whether the node has started the handshake
    pub fn is_started(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    /// Peer id the node assigned, once started
    pub fn peer(&self) -> Option<PeerId> {
        self.state.lock().sink.as_ref().map(EventSink::peer)
    }

    /// Feed key the node offered in its handshake
    pub fn feed_key(&self) -> Option<FeedKey> {
        self.state.lock().feed_key
    }

    /// Chain the node offered in its handshake
    pub fn offered_chain(&self) -> Option<Chain> {
        self.state.lock().offered_chain.clone()
    }

    /// Complete the handshake; `false` if it never started
    pub fn secure(&self) -> bool {
        self.with_sink(EventSink::secure)
    }

    /// Announce a remote trust chain
    pub fn announce_chain(&self, chain: Chain) -> bool {
        self.with_sink(|sink| sink.chain_update(chain))
    }

    /// Report a transport failure. The session stays open.
    pub fn fail(&self, error: &str) -> bool {
        self.with_sink(|sink| sink.error(FeedError::TransportError(error.to_string())))
    }

    /// Report that the remote hung up
    pub fn close(&self) -> bool {
        self.with_sink(EventSink::closed)
    }

    fn with_sink(&self, f: impl FnOnce(&EventSink)) -> bool {
        match &self.state.lock().sink {
            Some(sink) => {
                f(sink);
                true
            }
            None => false,
        }
    }
}

/// Transport driven entirely by its [`TransportControl`]
#[derive(Debug)]
pub struct SimTransport {
    control: TransportControl,
    secure_on_start: bool,
    refuse: Option<String>,
}

impl SimTransport {
    /// A transport that waits for [`TransportControl::secure`]
    pub fn new() -> (SimTransport, TransportControl) {
        let control = TransportControl::default();
        let transport = SimTransport {
            control: control.clone(),
            secure_on_start: false,
            refuse: None,
        };
        (transport, control)
    }

    /// A transport whose handshake completes as soon as it starts
    pub fn secured() -> (SimTransport, TransportControl) {
        let (mut transport, control) = SimTransport::new();
        transport.secure_on_start = true;
        (transport, control)
    }

    /// A transport that fails to start its handshake
    pub fn refusing(reason: &str) -> SimTransport {
        let (mut transport, _) = SimTransport::new();
        transport.refuse = Some(reason.to_string());
        transport
    }

    pub fn control(&self) -> &TransportControl {
        &self.control
    }
}

impl Transport for SimTransport {
    fn start(&mut self, handshake: Handshake<'_>, events: EventSink) -> FeedResult<()> {
        if let Some(reason) = &self.refuse {
            return Err(FeedError::HandshakeFailed(reason.clone()));
        }

        let mut state = self.control.state.lock();
        if state.sink.is_some() {
            return Err(FeedError::HandshakeFailed("transport already started".into()));
        }
        state.feed_key = Some(*handshake.feed_key);
        state.offered_chain = Some(handshake.chain.clone());
        if self.secure_on_start {
            events.secure();
        }
        state.sink = Some(events);
        Ok(())
    }
}
