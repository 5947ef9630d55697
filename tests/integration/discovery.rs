use crate::*;
use serde_json::json;

/// Two nodes on the same port find each other through broadcast.
#[tokio::test]
async fn test_two_nodes_discover_each_other() {
    let mut a = start_node("A1", "Alice", 200, 30_000, 0);
    let port = bound_port(&a).await;
    let mut b = start_node("B1", "Bob", 200, 30_000, port);
    assert_eq!(bound_port(&b).await, port);

    let seen_by_b = next_update_from(&mut b.events, "A1", EVENT_TIMEOUT)
        .await
        .expect("B should hear A");
    assert_eq!(seen_by_b.get("name"), Some(&json!("Alice")));
    assert_eq!(seen_by_b.get("addresses"), Some(&json!(["127.0.0.1"])));
    assert!(seen_by_b.get("uuid").is_none());

    let seen_by_a = next_update_from(&mut a.events, "B1", EVENT_TIMEOUT)
        .await
        .expect("A should hear B");
    assert_eq!(seen_by_a.get("name"), Some(&json!("Bob")));

    // Neither node records itself.
    let peers_of_a = a.handle.peers().await;
    assert_eq!(peers_of_a.len(), 1);
    assert_eq!(peers_of_a[0].id, "B1");

    a.handle.shutdown().await;
    b.handle.shutdown().await;
}

/// A peer that stops announcing is removed once the expiry window passes.
#[tokio::test]
async fn test_silent_peer_expires() {
    let mut b = start_node("B1", "Bob", 60_000, 400, 0);
    let port = bound_port(&b).await;

    send_raw(port, &announcement("A1", "Alice")).unwrap();
    assert!(next_update_from(&mut b.events, "A1", EVENT_TIMEOUT).await.is_some());
    assert_eq!(b.handle.peers().await.len(), 1);

    assert!(
        next_removal_of(&mut b.events, "A1", EVENT_TIMEOUT).await,
        "A1 should expire"
    );
    assert!(b.handle.peers().await.is_empty());

    b.handle.shutdown().await;
}

/// Regular announcements, even with one missed, keep a peer alive.
#[tokio::test]
async fn test_refreshing_peer_survives_expiry() {
    let mut b = start_node("B1", "Bob", 60_000, 600, 0);
    let port = bound_port(&b).await;

    for round in 0..10 {
        // Round 4 is "lost".
        if round != 4 {
            send_raw(port, &announcement("A1", &format!("Alice #{round}"))).unwrap();
        }
        sleep(Duration::from_millis(150)).await;
    }

    let mut removed = false;
    while let Ok(event) = b.events.try_recv() {
        removed |= matches!(event, PeerEvent::Removed { .. });
    }
    assert!(!removed, "A1 must not expire while it keeps announcing");

    let peers = b.handle.peers().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].attributes.get("name"), Some(&json!("Alice #9")));

    b.handle.shutdown().await;
}

/// Unknown fields travel through to the host untouched.
#[tokio::test]
async fn test_extra_fields_are_tolerated() {
    let mut b = start_node("B1", "Bob", 60_000, 30_000, 0);
    let port = bound_port(&b).await;

    send_raw(
        port,
        br#"{"uuid":"A1","name":"Alice","platform":"linux","version":"0.7.0"}"#,
    )
    .unwrap();

    let attrs = next_update_from(&mut b.events, "A1", EVENT_TIMEOUT)
        .await
        .expect("update for A1");
    assert_eq!(attrs.get("name"), Some(&json!("Alice")));
    assert_eq!(attrs.get("platform"), Some(&json!("linux")));
    assert_eq!(attrs.get("version"), Some(&json!("0.7.0")));

    b.handle.shutdown().await;
}

/// Datagrams without a usable id never reach the table.
#[tokio::test]
async fn test_malformed_datagrams_are_dropped() {
    let mut b = start_node("B1", "Bob", 60_000, 30_000, 0);
    let port = bound_port(&b).await;

    send_raw(port, b"\x00\x01 definitely not json").unwrap();
    send_raw(port, br#"{"name":"no id"}"#).unwrap();
    send_raw(port, br#"{"uuid":"","name":"empty id"}"#).unwrap();
    send_raw(port, &announcement("A1", "Alice")).unwrap();

    // The first event is the valid one.
    let first = timeout(EVENT_TIMEOUT, b.events.recv())
        .await
        .expect("an event")
        .expect("channel open");
    let PeerEvent::Updated { id, .. } = first else {
        panic!("expected an update, got {first:?}");
    };
    assert_eq!(id, "A1");

    let peers = b.handle.peers().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, "A1");

    b.handle.shutdown().await;
}

/// On-demand announcements reach peers without waiting for the timer.
#[tokio::test]
async fn test_broadcast_now_is_heard() {
    let a = start_node("A1", "Alice", 60_000, 30_000, 0);
    let port = bound_port(&a).await;
    let mut b = start_node("B1", "Bob", 60_000, 30_000, port);
    bound_port(&b).await;

    a.handle.broadcast_now();

    assert!(next_update_from(&mut b.events, "A1", EVENT_TIMEOUT).await.is_some());

    a.handle.shutdown().await;
    b.handle.shutdown().await;
}
