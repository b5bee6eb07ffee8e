//! End-to-end scenarios through the client facade on an in-process cluster.

use std::time::Duration;

use fencepost_coordinator::ErrorKind;
use fencepost_core::{
    Epoch, LeaderState, LockDescriptor, LockResponse, LockToken, Scope, TimestampBlock,
};
use fencepost_testing::{TestCluster, init_tracing, test_scope};

const LEASE: Duration = Duration::from_secs(30);

fn r(name: &str) -> LockDescriptor {
    LockDescriptor::new(name)
}

#[tokio::test]
async fn test_failover_fences_deposed_leader() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let scope = test_scope();

    let p1 = cluster.node("p1");
    let client1 = p1.client(&scope);
    let first = client1.lock([r("r1")], LEASE).await.unwrap();
    assert_eq!(first.token(), Some(LockToken::new(Epoch(1), 1)));

    let p2 = cluster.node("p2");
    let client2 = p2.client(&scope);
    client2.get_fresh_timestamp().await.unwrap();
    let LeaderState::Leader(second) = p2.coordinator().scope(&scope).leader_state() else {
        panic!("p2 should lead after its election");
    };
    assert!(second.epoch > Epoch(1));

    // p1 still believes it leads until the fence says otherwise
    assert!(p1.coordinator().scope(&scope).leader_state().is_leader());
    let report = client1.lock([r("r2")], LEASE).await.unwrap_err();
    assert_eq!(report.current_context().kind(), ErrorKind::LostLeadership);
    assert_eq!(p1.coordinator().scope(&scope).leader_state(), LeaderState::NotLeader);

    // p1's lease survives the failover
    let response = client2.lock([r("r1")], LEASE).await.unwrap();
    assert_eq!(response, LockResponse::Unsuccessful);
    assert!(client2.lock([r("r2")], LEASE).await.unwrap().token().is_some());
}

#[tokio::test]
async fn test_lock_conflict_until_lease_expires() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let scope = test_scope();
    let client = cluster.node("p1").client(&scope);

    let first = client.lock([r("r1")], LEASE).await.unwrap();
    assert_eq!(first.token(), Some(LockToken::new(Epoch(1), 1)));

    assert_eq!(client.lock([r("r1")], LEASE).await.unwrap(), LockResponse::Unsuccessful);

    cluster.clock().advance(LEASE);
    assert_eq!(
        client.lock([r("r1")], LEASE).await.unwrap(),
        LockResponse::Unsuccessful,
        "lease is held through its expiry instant"
    );

    cluster.clock().advance(Duration::from_millis(1));
    let third = client.lock([r("r1")], LEASE).await.unwrap();
    assert_eq!(third.token(), Some(LockToken::new(Epoch(1), 2)));
}

#[tokio::test]
async fn test_double_unlock_is_silent() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let scope = test_scope();
    let node = cluster.node("p1");
    let client = node.client(&scope);

    let token = client.lock([r("r1"), r("r2")], LEASE).await.unwrap().token().unwrap();
    client.unlock([token]);
    client.unlock([token]);
    client.close().await;

    let handle = node.coordinator().scope(&scope);
    assert_eq!(handle.lease(&r("r1")).await.unwrap(), None);
    assert_eq!(handle.lease(&r("r2")).await.unwrap(), None);

    let client = node.client(&scope);
    let again = client.lock([r("r1")], LEASE).await.unwrap();
    assert_eq!(again.token(), Some(LockToken::new(Epoch(1), 2)));
}

#[tokio::test]
async fn test_timestamp_blocks_are_contiguous() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let client = cluster.node("p1").client(&test_scope());

    let first = client.get_timestamps(100).await.unwrap();
    assert_eq!(first, TimestampBlock { lower: 0, upper: 100 });
    let second = client.get_timestamps(100).await.unwrap();
    assert_eq!(second, TimestampBlock { lower: 100, upper: 200 });
    assert_eq!(client.get_fresh_timestamp().await.unwrap(), 200);
}

#[tokio::test]
async fn test_new_leader_continues_above_reserved_timestamps() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let scope = test_scope();

    let client1 = cluster.node("p1").client(&scope);
    let early = client1.get_timestamps(10).await.unwrap();

    let client2 = cluster.node("p2").client(&scope);
    let late = client2.get_timestamps(10).await.unwrap();
    assert!(late.lower >= early.upper, "{late:?} overlaps {early:?}");

    // p1 re-elects once after being fenced and keeps going above p2
    let resumed = client1.get_timestamps(10).await.unwrap();
    assert!(resumed.lower >= late.upper, "{resumed:?} overlaps {late:?}");
}

#[tokio::test]
async fn test_refresh_keeps_lease_alive() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let scope = test_scope();
    let client = cluster.node("p1").client(&scope);

    let token = client.lock([r("r1")], LEASE).await.unwrap().token().unwrap();
    cluster.clock().advance(Duration::from_secs(20));
    assert!(client.refresh(token).await.unwrap());

    cluster.clock().advance(Duration::from_secs(20));
    assert_eq!(client.lock([r("r1")], LEASE).await.unwrap(), LockResponse::Unsuccessful);

    cluster.clock().advance(Duration::from_secs(11));
    assert!(!client.refresh(token).await.unwrap());
    assert!(!client.refresh(token).await.unwrap());
}

#[tokio::test]
async fn test_refresh_of_unknown_epoch_is_an_error() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let client = cluster.node("p1").client(&test_scope());

    client.get_fresh_timestamp().await.unwrap();
    let report = client.refresh(LockToken::new(Epoch(50), 1)).await.unwrap_err();
    assert_eq!(report.current_context().kind(), ErrorKind::UnknownEpoch);
}

#[tokio::test]
async fn test_refresh_without_leadership_is_false() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let client = cluster.node("p1").client(&test_scope());
    assert!(!client.refresh(LockToken::new(Epoch(1), 1)).await.unwrap());
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let client = cluster.node("p1").client(&test_scope());

    let report = client.get_timestamps(0).await.unwrap_err();
    assert_eq!(report.current_context().kind(), ErrorKind::InvalidRequest);

    let report = client.lock(Vec::<LockDescriptor>::new(), LEASE).await.unwrap_err();
    assert_eq!(report.current_context().kind(), ErrorKind::InvalidRequest);

    let report = client.lock([r("r1")], Duration::ZERO).await.unwrap_err();
    assert_eq!(report.current_context().kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_scopes_are_independent() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let node = cluster.node("p1");
    let a = node.client(&Scope::new("orders", "tenant-a"));
    let b = node.client(&Scope::new("orders", "tenant-b"));

    assert_eq!(a.get_timestamps(5).await.unwrap().lower, 0);
    assert_eq!(b.get_timestamps(5).await.unwrap().lower, 0);

    let ta = a.lock([r("shared")], LEASE).await.unwrap().token().unwrap();
    let tb = b.lock([r("shared")], LEASE).await.unwrap().token().unwrap();
    assert_eq!(ta, LockToken::new(Epoch(1), 1));
    assert_eq!(tb, LockToken::new(Epoch(1), 1));
    assert_eq!(node.coordinator().scopes().len(), 2);
}

#[tokio::test]
async fn test_scopes_with_slashes_stay_apart() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let node = cluster.node("p1");
    let a = node.client(&Scope::new("a/b", "c"));
    let b = node.client(&Scope::new("a", "b/c"));

    assert_eq!(a.get_timestamps(5).await.unwrap().lower, 0);
    assert_eq!(b.get_timestamps(5).await.unwrap().lower, 0);
    assert_eq!(a.get_timestamps(5).await.unwrap().lower, 5);

    let ta = a.lock([r("r")], LEASE).await.unwrap().token().unwrap();
    let tb = b.lock([r("r")], LEASE).await.unwrap().token().unwrap();
    assert_eq!(ta, LockToken::new(Epoch(1), 1));
    assert_eq!(tb, LockToken::new(Epoch(1), 1));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_calls_share_one_election() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let scope = test_scope();
    let node = cluster.node("p1");
    node.set_latency(Duration::from_millis(5));
    let client = node.client(&scope);

    let (locked, stamped) = tokio::join!(client.lock([r("r1")], LEASE), client.get_timestamps(1));
    let token = locked.unwrap().token().unwrap();
    stamped.unwrap();
    assert_eq!(token, LockToken::new(Epoch(1), 1));

    let LeaderState::Leader(leadership) = node.coordinator().scope(&scope).leader_state() else {
        panic!("p1 should lead after its election");
    };
    assert_eq!(leadership.epoch, Epoch(1));
    assert!(client.refresh(token).await.unwrap());

    client.unlock([token]);
    client.close().await;
    assert_eq!(node.coordinator().scope(&scope).lease(&r("r1")).await.unwrap(), None);
}

#[tokio::test]
async fn test_majority_loss_stops_elections() {
    let _tracing = init_tracing();
    let cluster = TestCluster::new(3);
    let node = cluster.node("p1");
    node.isolate(&[0, 1]);

    let client = node.client(&test_scope());
    let report = client.get_fresh_timestamp().await.unwrap_err();
    assert_eq!(report.current_context().kind(), ErrorKind::QuorumUnavailable);

    node.heal();
    assert_eq!(client.get_fresh_timestamp().await.unwrap(), 0);
}
