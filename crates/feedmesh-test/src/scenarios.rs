//! End-to-end coordinator scenarios

use std::time::Duration;

use proptest::prelude::*;

use feedmesh_core::{Chain, ChainLink, FeedError, Range, Value};
use feedmesh_node::{InsertOptions, NodeHandle, NodeStats};

use crate::{Calls, Mesh, ProbeFactory, SimTransport, TestNode};

fn chain_of(len: usize) -> Chain {
    (0..len).map(|i| ChainLink::new(vec![i as u8])).collect()
}

fn values(items: &[&str]) -> Vec<Value> {
    items.iter().map(|item| Value::from(*item)).collect()
}

// ============================================================================
// INSERTION
// ============================================================================

#[test]
fn test_duplicate_bulk_insert_still_completes() {
    let mut node = TestNode::probe();
    let first = Calls::new();
    let second = Calls::new();

    let accepted = node
        .bulk_insert_with(values(&["a", "b"]), InsertOptions::default(), first.once())
        .unwrap();
    assert_eq!(accepted, values(&["a", "b"]));

    let accepted = node
        .bulk_insert_with(values(&["a", "b"]), InsertOptions::default(), second.once())
        .unwrap();
    assert!(accepted.is_empty());
    assert_eq!(second.count(), 0, "completion must not run inline");

    node.settle();
    assert_eq!(first.all(), vec![values(&["a", "b"])]);
    assert_eq!(second.all(), vec![Vec::<Value>::new()]);
}

#[test]
fn test_duplicates_are_not_rebroadcast() {
    let mut node = TestNode::probe();
    let (peer, _) = node.join();
    let log = node.log();

    node.bulk_insert(values(&["a", "b"])).unwrap();
    node.bulk_insert(values(&["b", "c"])).unwrap();

    assert_eq!(
        log.broadcasts(peer),
        vec![values(&["a", "b"]), values(&["c"])]
    );
}

#[test]
fn test_malformed_batch_fails_before_mutation() {
    let mut node = TestNode::probe();
    let (peer, _) = node.join();
    let mut sub = node.watch(Range::full());

    let err = node
        .bulk_insert(vec![Value::from("fine"), Value::default()])
        .unwrap_err();

    assert!(matches!(err, FeedError::InvalidArgument(_)));
    assert!(!node.has(&Value::from("fine")));
    assert!(node.log().broadcasts(peer).is_empty());
    assert!(sub.drain().is_empty());
}

proptest! {
    #[test]
    fn prop_insert_agrees_with_bulk_insert(
        items in prop::collection::vec("[a-d]{1,2}", 1..24)
    ) {
        let mut single = TestNode::probe();
        let mut bulk = TestNode::probe();

        for item in &items {
            let value = Value::from(item.as_str());
            let inserted = single.insert(value.clone()).unwrap();
            let accepted = bulk.bulk_insert(vec![value.clone()]).unwrap();
            prop_assert_eq!(inserted, accepted == vec![value]);
        }
    }
}

// ============================================================================
// PEERS AVAILABLE
// ============================================================================

#[test]
fn test_peers_available_waits_for_first_peer() {
    let mut node = TestNode::probe();
    let calls = Calls::new();

    node.on_peers_available(calls.once());
    node.settle();
    assert_eq!(calls.count(), 0);

    let (transport, control) = SimTransport::new();
    node.connect(transport);
    control.secure();

    // The tick that admits the peer only schedules the callback
    node.tick();
    assert_eq!(node.peer_count(), 1);
    assert_eq!(calls.count(), 0);

    node.tick();
    assert_eq!(calls.all(), vec![1]);

    node.join();
    node.settle();
    assert_eq!(calls.count(), 1, "fires once per registration");
}

#[test]
fn test_peers_available_with_existing_peers_is_deferred() {
    let mut node = TestNode::probe();
    node.join();
    node.join();

    let calls = Calls::new();
    node.on_peers_available(calls.once());
    assert_eq!(calls.count(), 0);

    node.tick();
    assert_eq!(calls.all(), vec![2]);
}

#[test]
fn test_every_waiting_caller_is_notified() {
    let mut node = TestNode::probe();
    let calls = Calls::new();
    for _ in 0..3 {
        node.on_peers_available(calls.once());
    }

    node.join();

    assert_eq!(calls.all(), vec![1, 1, 1]);
}

// ============================================================================
// BROADCAST FAN-OUT
// ============================================================================

#[test]
fn test_zero_peer_broadcast_completes_on_later_tick() {
    let mut node = TestNode::probe();
    let calls = Calls::new();

    assert!(node
        .insert_with(Value::from("solo"), InsertOptions::default(), calls.once())
        .unwrap());
    assert_eq!(calls.count(), 0);

    node.tick();
    assert_eq!(calls.all(), vec![values(&["solo"])]);
}

#[test]
fn test_zero_min_peers_still_sends_everywhere() {
    let mut node = TestNode::probe();
    let (a, _) = node.join();
    let (b, _) = node.join();
    let log = node.log();
    let calls = Calls::new();

    node.insert_with(
        Value::from("q"),
        InsertOptions::default().with_min_peers(0),
        calls.once(),
    )
    .unwrap();
    assert_eq!(calls.count(), 0);
    assert_eq!(log.pending_acks(a), 1);
    assert_eq!(log.pending_acks(b), 1);

    node.tick();
    assert_eq!(calls.count(), 1);
}

#[test]
fn test_quorum_completion_fires_once() {
    let mut node = TestNode::probe();
    let peers: Vec<_> = (0..3).map(|_| node.join().0).collect();
    let log = node.log();
    let calls = Calls::new();

    node.insert_with(
        Value::from("q"),
        InsertOptions::default().with_min_peers(2),
        calls.once(),
    )
    .unwrap();

    log.ack_all(peers[0]);
    node.settle();
    assert_eq!(calls.count(), 0);

    log.ack_all(peers[1]);
    node.settle();
    assert_eq!(calls.count(), 1);

    log.ack_all(peers[2]);
    node.settle();
    assert_eq!(calls.count(), 1);
    assert_eq!(node.pending_broadcasts(), 0);
}

#[test]
fn test_origin_never_receives_its_own_content() {
    let mut node = TestNode::probe();
    let (origin, _) = node.join();
    let (other, _) = node.join();
    let log = node.log();
    let mut sub = node.watch(Range::full());

    log.push(origin, values(&["x", "y"]));
    node.settle();

    assert!(log.received(origin).is_empty());
    assert_eq!(log.received(other), values(&["x", "y"]));
    assert_eq!(sub.drain(), values(&["x", "y"]));
    assert!(node.has(&Value::from("x")));
}

#[test]
fn test_known_peer_content_is_not_reflected() {
    let mut node = TestNode::probe();
    let (a, _) = node.join();
    let (b, _) = node.join();
    let log = node.log();

    node.insert(Value::from("k")).unwrap();
    log.push(a, values(&["k"]));
    node.settle();

    assert_eq!(log.broadcasts(b).len(), 1);
    assert_eq!(node.stats().duplicates_dropped, 1);
}

#[test]
fn test_malformed_peer_values_are_dropped() {
    let mut node = TestNode::probe();
    let (peer, _) = node.join();
    let log = node.log();

    log.push(peer, vec![Value::from("ok"), Value::default()]);
    node.settle();

    assert!(node.has(&Value::from("ok")));
    assert_eq!(node.stats().malformed_dropped, 1);
}

#[test]
fn test_content_from_closed_peer_is_ignored() {
    let mut node = TestNode::probe();
    let (peer, control) = node.join();
    let log = node.log();

    control.close();
    node.settle();
    log.push(peer, values(&["late"]));
    node.settle();

    assert!(!node.has(&Value::from("late")));
}

// ============================================================================
// WATCHERS
// ============================================================================

#[test]
fn test_watch_backlog_precedes_live_values() {
    let mut node = TestNode::probe();
    node.bulk_insert(values(&["a/1", "a/2", "b/1"])).unwrap();

    let mut sub = node.watch(Range::prefix("a/"));
    node.insert(Value::from("a/3")).unwrap();
    node.insert(Value::from("b/2")).unwrap();

    assert_eq!(sub.try_recv(), Some(values(&["a/1", "a/2"])));
    assert_eq!(sub.try_recv(), Some(values(&["a/3"])));
    assert_eq!(sub.try_recv(), None);
}

#[test]
fn test_unwatch_stops_only_that_watcher() {
    let mut node = TestNode::probe();
    let mut kept = node.watch(Range::full());
    let mut dropped = node.watch(Range::full());

    assert!(node.unwatch(dropped.id()));
    assert!(!node.unwatch(dropped.id()));
    node.insert(Value::from("after")).unwrap();

    assert_eq!(kept.drain(), values(&["after"]));
    assert!(dropped.drain().is_empty());
    assert_eq!(node.watcher_count(), 1);
}

#[test]
fn test_watchers_never_see_rejected_content() {
    let mut node = TestNode::probe();
    node.insert(Value::from("v")).unwrap();
    let mut sub = node.watch(Range::full());
    assert_eq!(sub.drain(), values(&["v"]));

    node.insert(Value::from("v")).unwrap();
    let _ = node.bulk_insert(vec![Value::from("w"), Value::default()]);

    assert!(sub.drain().is_empty());
}

#[test]
fn test_partial_node_requests_ranges_from_new_peers() {
    let mut node = TestNode::probe_with(ProbeFactory::new(), |config| config.partial());
    let _a = node.watch(Range::prefix("a/"));
    let _b = node.watch(Range::prefix("b/"));

    let (peer, _) = node.join();

    assert_eq!(
        node.log().requests(peer),
        vec![Range::prefix("a/"), Range::prefix("b/")]
    );
    assert_eq!(node.log().is_full(peer), Some(false));
}

// ============================================================================
// TRUST CHAIN
// ============================================================================

#[test]
fn test_chain_keeps_shortest_announcement() {
    let mut node = TestNode::probe_with(ProbeFactory::new(), |config| {
        config.with_chain(chain_of(8))
    });
    let (_, control) = node.join();

    for len in [5, 3, 4] {
        control.announce_chain(chain_of(len));
    }
    node.settle();

    assert_eq!(node.chain().len(), 3);
    let lens: Vec<usize> = node
        .ledger()
        .announcements(node.feed_key())
        .iter()
        .map(Chain::len)
        .collect();
    assert_eq!(lens, vec![5, 3, 4]);
}

#[test]
fn test_new_connections_offer_adopted_chain() {
    let mut node = TestNode::probe_with(ProbeFactory::new(), |config| {
        config.with_chain(chain_of(6))
    });
    let (_, control) = node.join();
    control.announce_chain(chain_of(2));
    node.settle();

    let (transport, later) = SimTransport::new();
    node.connect(transport);

    assert_eq!(later.offered_chain().map(|c| c.len()), Some(2));
}

#[test]
fn test_chain_from_handshaking_peer_counts() {
    let mut node = TestNode::probe_with(ProbeFactory::new(), |config| {
        config.with_chain(chain_of(4))
    });
    let (transport, control) = SimTransport::new();
    node.connect(transport);

    control.announce_chain(chain_of(1));
    node.settle();

    assert_eq!(node.peer_count(), 0);
    assert_eq!(node.chain().len(), 1);
}

proptest! {
    #[test]
    fn prop_chain_length_never_grows(
        initial in 0usize..10,
        announced in prop::collection::vec(0usize..12, 0..16)
    ) {
        let mut node = TestNode::probe_with(ProbeFactory::new(), |config| {
            config.with_chain(chain_of(initial))
        });
        let (_, control) = node.join();

        let mut expected = initial;
        for len in &announced {
            control.announce_chain(chain_of(*len));
            node.settle();
            expected = expected.min(*len);
            prop_assert_eq!(node.chain().len(), expected);
        }
        prop_assert_eq!(
            node.ledger().announcements(node.feed_key()).len(),
            announced.len()
        );
    }
}

// ============================================================================
// CLOSE / DESTROY
// ============================================================================

#[test]
fn test_close_reports_each_peer() {
    let mut node = TestNode::probe();
    let peers: Vec<_> = (0..3).map(|_| node.join().0).collect();
    let calls = Calls::new();

    assert_eq!(node.close(calls.each()), 3);
    node.settle();

    let mut closed = calls.all();
    closed.sort();
    assert_eq!(closed, peers);
    assert_eq!(node.peer_count(), 0);
    assert!(peers.iter().all(|peer| node.log().is_destroyed(*peer)));
}

#[test]
fn test_close_without_peers_never_calls_back() {
    let mut node = TestNode::probe();
    let calls = Calls::new();

    assert_eq!(node.close(calls.each()), 0);
    node.settle();

    assert_eq!(calls.count(), 0);
}

// ============================================================================
// MESH
// ============================================================================

#[test]
fn test_mesh_replicates_along_a_line() {
    let mut mesh = Mesh::new(4);
    mesh.line();
    mesh.settle();

    mesh.node_mut(0).insert(Value::from("hello")).unwrap();
    mesh.settle();

    for node in mesh.iter() {
        assert!(node.has(&Value::from("hello")));
        assert_eq!(node.stats().duplicates_dropped, 0);
    }
}

#[test]
fn test_mesh_watcher_sees_remote_insert() {
    let mut mesh = Mesh::new(3);
    mesh.line();
    mesh.settle();
    let mut sub = mesh.node_mut(2).watch(Range::prefix("news/"));

    mesh.node_mut(0)
        .bulk_insert(values(&["news/1", "misc/1"]))
        .unwrap();
    mesh.settle();

    assert_eq!(sub.drain(), values(&["news/1"]));
}

#[test]
fn test_mesh_ring_converges_without_loops() {
    let mut mesh = Mesh::new(3);
    mesh.line();
    mesh.link(2, 0);
    mesh.settle();

    mesh.node_mut(1).insert(Value::from("r")).unwrap();
    mesh.settle();

    assert!(mesh.iter().all(|node| node.has(&Value::from("r"))));
    let total: u64 = mesh.iter().map(|node| node.stats().values_accepted).sum();
    assert_eq!(total, 3);
}

#[test]
fn test_partial_mesh_pulls_watched_range() {
    let mut mesh = Mesh::with_config(2, |_, config| config.partial());
    mesh.node_mut(0)
        .bulk_insert(values(&["a/1", "b/1"]))
        .unwrap();
    let mut sub = mesh.node_mut(1).watch(Range::prefix("a/"));

    mesh.link(0, 1);
    mesh.settle();

    assert_eq!(sub.drain(), values(&["a/1"]));
    assert!(!mesh.node(1).has(&Value::from("b/1")));
}

#[test]
fn test_mesh_chain_converges_to_shortest() {
    let mut mesh = Mesh::with_config(3, |i, config| config.with_chain(chain_of(3 + i * 2)));
    mesh.line();
    mesh.settle();

    assert_eq!(mesh.node(0).chain().len(), 3);
    assert_eq!(mesh.node(1).chain().len(), 3);
    // Chains are exchanged at handshake time only
    assert_eq!(mesh.node(2).chain().len(), 5);
}

// ============================================================================
// SERVICE
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out")
}

#[tokio::test]
async fn test_handle_insert_and_delivery() {
    let node = TestNode::probe_with(ProbeFactory::auto_ack(), |config| config).into_inner();
    let (handle, task) = NodeHandle::spawn(node);

    let (transport, _) = SimTransport::secured();
    handle.connect(transport).await.unwrap();
    assert_eq!(within(handle.peers_available()).await.unwrap(), 1);

    let (inserted, delivery) = handle
        .insert(Value::from("v"), InsertOptions::default())
        .await
        .unwrap();
    assert!(inserted);
    assert_eq!(within(delivery.wait()).await.unwrap(), values(&["v"]));
    assert!(handle.has(Value::from("v")).await.unwrap());

    handle.shutdown().await.unwrap();
    let stats: NodeStats = task.await.unwrap();
    assert_eq!(stats.values_accepted, 1);
    assert_eq!(stats.broadcasts_completed, 1);
}

#[tokio::test]
async fn test_handle_destroy_cancels_delivery() {
    let node = TestNode::probe().into_inner();
    let (handle, _task) = NodeHandle::spawn(node);
    let (transport, _) = SimTransport::secured();
    handle.connect(transport).await.unwrap();
    within(handle.peers_available()).await.unwrap();

    let (_, delivery) = handle
        .insert(Value::from("held"), InsertOptions::default())
        .await
        .unwrap();
    handle.destroy().await.unwrap();

    assert_eq!(within(delivery.wait()).await.unwrap_err(), FeedError::Cancelled);
    assert!(handle.has(Value::from("held")).await.unwrap());
    let (transport, _) = SimTransport::secured();
    handle.connect(transport).await.unwrap();
    assert_eq!(within(handle.peers_available()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_handle_duplicate_insert_delivers_empty() {
    let node = TestNode::probe().into_inner();
    let (handle, _task) = NodeHandle::spawn(node);

    let (first, delivery) = handle
        .bulk_insert(values(&["a"]), InsertOptions::default())
        .await
        .unwrap();
    assert_eq!(first, values(&["a"]));
    assert_eq!(within(delivery.wait()).await.unwrap(), values(&["a"]));

    let (second, delivery) = handle
        .bulk_insert(values(&["a"]), InsertOptions::default())
        .await
        .unwrap();
    assert!(second.is_empty());
    assert!(within(delivery.wait()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_handle_watch_streams_backlog_then_live() {
    let node = TestNode::probe().into_inner();
    let (handle, _task) = NodeHandle::spawn(node);

    handle
        .bulk_insert(values(&["a/1", "z"]), InsertOptions::default())
        .await
        .unwrap();
    let mut sub = handle.watch(Range::prefix("a/")).await.unwrap();
    handle
        .insert(Value::from("a/2"), InsertOptions::default())
        .await
        .unwrap();

    assert_eq!(within(sub.recv()).await, Some(values(&["a/1"])));
    assert_eq!(within(sub.recv()).await, Some(values(&["a/2"])));

    assert!(handle.unwatch(sub.id()).await.unwrap());
    assert_eq!(within(sub.recv()).await, None);
}

#[tokio::test]
async fn test_handle_rejects_malformed_insert() {
    let node = TestNode::probe().into_inner();
    let (handle, _task) = NodeHandle::spawn(node);

    let err = handle
        .insert(Value::default(), InsertOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(handle
        .request(Range::full(), None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_handle_close_and_stop() {
    let node = TestNode::probe().into_inner();
    let (handle, task) = NodeHandle::spawn(node);
    for _ in 0..2 {
        let (transport, _) = SimTransport::secured();
        handle.connect(transport).await.unwrap();
    }
    within(handle.peers_available()).await.unwrap();

    let calls = Calls::new();
    assert_eq!(handle.close(calls.each()).await.unwrap(), 2);
    assert_eq!(calls.count(), 2);

    handle.shutdown().await.unwrap();
    let stats = task.await.unwrap();
    assert_eq!(stats.peers_connected, 2);
    assert_eq!(
        handle.has(Value::from("x")).await.unwrap_err(),
        FeedError::NodeStopped
    );
}
