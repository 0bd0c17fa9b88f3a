//! Node service - runs a node as a tokio task
//!
//! The task owns the [`Node`] and is the only code that touches it. Callers
//! talk to it through a cloneable [`NodeHandle`]; each call is a command on
//! a bounded channel with a oneshot reply.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use feedmesh_core::{Chain, FeedError, FeedResult, PeerId, Range, Value, WatcherId};

use crate::{CloseCallback, Completion, InsertOptions, Node, NodeStats, PeerFactory, Subscription};

enum Command<F: PeerFactory> {
    Connect {
        transport: F::Transport,
        resp: oneshot::Sender<PeerId>,
    },
    Insert {
        values: Vec<Value>,
        options: InsertOptions,
        resp: oneshot::Sender<FeedResult<(Vec<Value>, Delivery)>>,
    },
    Watch {
        range: Range,
        resp: oneshot::Sender<Subscription>,
    },
    Unwatch {
        watcher: WatcherId,
        resp: oneshot::Sender<bool>,
    },
    PeersAvailable {
        notify: oneshot::Sender<usize>,
    },
    Has {
        value: Value,
        resp: oneshot::Sender<bool>,
    },
    Request {
        range: Range,
        limit: Option<usize>,
        resp: oneshot::Sender<Vec<Value>>,
    },
    Chain {
        resp: oneshot::Sender<Chain>,
    },
    Stats {
        resp: oneshot::Sender<NodeStats>,
    },
    Close {
        callback: CloseCallback,
        resp: oneshot::Sender<usize>,
    },
    Destroy {
        resp: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Completion of one insert's broadcast
#[derive(Debug)]
pub struct Delivery {
    rx: oneshot::Receiver<Vec<Value>>,
}

impl Delivery {
    fn channel() -> (Completion, Delivery) {
        let (tx, rx) = oneshot::channel();
        let completion: Completion = Box::new(move |values| {
            let _ = tx.send(values);
        });
        (completion, Delivery { rx })
    }

    /// Wait for the broadcast to complete.
    ///
    /// Never resolves while a peer holds an unacknowledged send; wrap it in
    /// a timeout if latency matters. Fails with `Cancelled` once the node is
    /// destroyed or stopped first.
    pub async fn wait(self) -> FeedResult<Vec<Value>> {
        self.rx.await.map_err(|_| FeedError::Cancelled)
    }
}

/// Handle to a node running in its own task
pub struct NodeHandle<F: PeerFactory> {
    tx: mpsc::Sender<Command<F>>,
}

impl<F: PeerFactory> Clone for NodeHandle<F> {
    fn clone(&self) -> Self {
        NodeHandle {
            tx: self.tx.clone(),
        }
    }
}

impl<F: PeerFactory> fmt::Debug for NodeHandle<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("stopped", &self.tx.is_closed())
            .finish()
    }
}

impl<F: PeerFactory> NodeHandle<F> {
    /// Move `node` into a new task and return its handle. The task ends on
    /// [`NodeHandle::shutdown`] or when every handle is dropped, and yields
    /// the final stats.
    pub fn spawn(node: Node<F>) -> (Self, JoinHandle<NodeStats>) {
        let (tx, rx) = mpsc::channel(node.config().command_buffer);
        let task = tokio::spawn(run(node, rx));
        (NodeHandle { tx }, task)
    }

    async fn call<T>(&self, command: Command<F>, rx: oneshot::Receiver<T>) -> FeedResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| FeedError::NodeStopped)?;
        rx.await.map_err(|_| FeedError::NodeStopped)
    }

    pub async fn connect(&self, transport: F::Transport) -> FeedResult<PeerId> {
        let (resp, rx) = oneshot::channel();
        self.call(Command::Connect { transport, resp }, rx).await
    }

    /// Insert one value; `true` if it was new
    pub async fn insert(&self, value: Value, options: InsertOptions) -> FeedResult<(bool, Delivery)> {
        let (accepted, delivery) = self.bulk_insert(vec![value], options).await?;
        Ok((!accepted.is_empty(), delivery))
    }

    /// Insert a batch; returns the new values and their broadcast completion
    pub async fn bulk_insert(
        &self,
        values: Vec<Value>,
        options: InsertOptions,
    ) -> FeedResult<(Vec<Value>, Delivery)> {
        let (resp, rx) = oneshot::channel();
        self.call(
            Command::Insert {
                values,
                options,
                resp,
            },
            rx,
        )
        .await?
    }

    pub async fn watch(&self, range: Range) -> FeedResult<Subscription> {
        let (resp, rx) = oneshot::channel();
        self.call(Command::Watch { range, resp }, rx).await
    }

    pub async fn unwatch(&self, watcher: WatcherId) -> FeedResult<bool> {
        let (resp, rx) = oneshot::channel();
        self.call(Command::Unwatch { watcher, resp }, rx).await
    }

    /// Resolve with the peer count once at least one peer is connected.
    ///
    /// Fails with `Cancelled` if the node is destroyed first.
    pub async fn peers_available(&self) -> FeedResult<usize> {
        let (notify, rx) = oneshot::channel();
        self.tx
            .send(Command::PeersAvailable { notify })
            .await
            .map_err(|_| FeedError::NodeStopped)?;
        rx.await.map_err(|_| FeedError::Cancelled)
    }

    pub async fn has(&self, value: Value) -> FeedResult<bool> {
        let (resp, rx) = oneshot::channel();
        self.call(Command::Has { value, resp }, rx).await
    }

    pub async fn request(&self, range: Range, limit: Option<usize>) -> FeedResult<Vec<Value>> {
        let (resp, rx) = oneshot::channel();
        self.call(Command::Request { range, limit, resp }, rx).await
    }

    pub async fn chain(&self) -> FeedResult<Chain> {
        let (resp, rx) = oneshot::channel();
        self.call(Command::Chain { resp }, rx).await
    }

    pub async fn stats(&self) -> FeedResult<NodeStats> {
        let (resp, rx) = oneshot::channel();
        self.call(Command::Stats { resp }, rx).await
    }

    /// Close every peer gracefully; `on_closed` runs once per peer
    pub async fn close<C>(&self, on_closed: C) -> FeedResult<usize>
    where
        C: Fn(PeerId) + Send + Sync + 'static,
    {
        let (resp, rx) = oneshot::channel();
        let callback: CloseCallback = Arc::new(on_closed);
        self.call(Command::Close { callback, resp }, rx).await
    }

    pub async fn destroy(&self) -> FeedResult<()> {
        let (resp, rx) = oneshot::channel();
        self.call(Command::Destroy { resp }, rx).await
    }

    /// Stop the node task; its peers are destroyed
    pub async fn shutdown(&self) -> FeedResult<()> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| FeedError::NodeStopped)
    }
}

async fn run<F: PeerFactory>(mut node: Node<F>, mut commands: mpsc::Receiver<Command<F>>) -> NodeStats {
    let mut housekeeping = tokio::time::interval(node.config().poll_interval);
    housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(feed = %node.feed_id(), full = node.is_full(), "node started");

    // Deferred work queued by one iteration runs at the top of the next.
    // Queued node events are handled before the next command.
    loop {
        node.begin_tick();

        tokio::select! {
            biased;
            Some(event) = node.recv_event() => node.handle_event(event),
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => execute(&mut node, command),
            },
            _ = housekeeping.tick() => {
                let pruned = node.prune_watchers();
                if pruned > 0 {
                    tracing::debug!(feed = %node.feed_id(), pruned, "abandoned watchers pruned");
                }
            }
        }
    }

    node.destroy();
    tracing::info!(feed = %node.feed_id(), "node stopped");
    node.stats().clone()
}

fn execute<F: PeerFactory>(node: &mut Node<F>, command: Command<F>) {
    // A caller that gave up on its reply is not an error
    match command {
        Command::Connect { transport, resp } => {
            let _ = resp.send(node.connect(transport));
        }
        Command::Insert {
            values,
            options,
            resp,
        } => {
            let (completion, delivery) = Delivery::channel();
            let result = node
                .insert_batch(values, options, Some(completion))
                .map(|accepted| (accepted, delivery));
            let _ = resp.send(result);
        }
        Command::Watch { range, resp } => {
            let _ = resp.send(node.watch(range));
        }
        Command::Unwatch { watcher, resp } => {
            let _ = resp.send(node.unwatch(watcher));
        }
        Command::PeersAvailable { notify } => {
            node.on_peers_available(move |peers| {
                let _ = notify.send(peers);
            });
        }
        Command::Has { value, resp } => {
            let _ = resp.send(node.has(&value));
        }
        Command::Request { range, limit, resp } => {
            let _ = resp.send(node.request(&range, limit));
        }
        Command::Chain { resp } => {
            let _ = resp.send(node.chain().clone());
        }
        Command::Stats { resp } => {
            let _ = resp.send(node.stats().clone());
        }
        Command::Close { callback, resp } => {
            let count = node.close(move |peer| callback(peer));
            let _ = resp.send(count);
        }
        Command::Destroy { resp } => {
            node.destroy();
            let _ = resp.send(());
        }
        Command::Shutdown => {}
    }
}
