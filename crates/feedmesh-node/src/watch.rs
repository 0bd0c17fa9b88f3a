//! Range watchers
//!
//! The node keeps a [`Watcher`] per open watch; the caller keeps the
//! matching [`Subscription`]. Batches flow between them over an unbounded
//! channel so pushing never blocks the event loop.

use tokio::sync::mpsc;

use feedmesh_core::{Range, Value, WatcherId};

/// Node-side half of a watch
#[derive(Debug)]
pub struct Watcher {
    id: WatcherId,
    range: Range,
    tx: mpsc::UnboundedSender<Vec<Value>>,
}

impl Watcher {
    /// Create a watcher and the subscription that receives its pushes
    pub fn open(id: WatcherId, range: Range) -> (Watcher, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Watcher {
            id,
            range: range.clone(),
            tx,
        };
        let subscription = Subscription { id, range, rx };
        (watcher, subscription)
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    /// Deliver the values that fall in this watcher's range.
    ///
    /// Returns the number delivered, or `None` once the subscription has
    /// been dropped.
    pub fn push(&self, values: &[Value]) -> Option<usize> {
        let matches: Vec<Value> = values
            .iter()
            .filter(|value| self.range.contains(value))
            .cloned()
            .collect();
        if matches.is_empty() {
            return if self.tx.is_closed() { None } else { Some(0) };
        }
        let count = matches.len();
        self.tx.send(matches).ok()?;
        Some(count)
    }

    /// Whether the caller dropped its subscription
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Caller-side half of a watch: backlog first, then live matches
#[derive(Debug)]
pub struct Subscription {
    id: WatcherId,
    range: Range,
    rx: mpsc::UnboundedReceiver<Vec<Value>>,
}

impl Subscription {
    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    /// Next batch; `None` once the watcher is gone and drained
    pub async fn recv(&mut self) -> Option<Vec<Value>> {
        self.rx.recv().await
    }

    /// Next batch if one is already queued
    pub fn try_recv(&mut self) -> Option<Vec<Value>> {
        self.rx.try_recv().ok()
    }

    /// Every queued batch, flattened
    pub fn drain(&mut self) -> Vec<Value> {
        let mut values = Vec::new();
        while let Some(batch) = self.try_recv() {
            values.extend(batch);
        }
        values
    }
}
