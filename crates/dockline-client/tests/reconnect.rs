//! Reconnection behavior against an in-process backend.

mod common;

use chrono::Utc;
use common::{wait_for_event, TestServer};
use dockline_client::{ChatClient, ClientConfig, ClientEvent, ConnectionStatus};
use dockline_types::ClientFrame;
use std::time::Duration;
use tokio_test::assert_ok;

/// Shrunk reconnect delays so the full schedule plays out in milliseconds.
fn test_config(endpoint: String) -> ClientConfig {
    ClientConfig {
        endpoint,
        reconnect_base_delay: Duration::from_millis(25),
        reconnect_max_delay: Duration::from_millis(200),
        keepalive_interval: Duration::from_secs(60),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_abnormal_close_triggers_reconnect() {
    let server = TestServer::spawn().await;
    let client = ChatClient::new(test_config(server.endpoint()));
    let mut events = client.subscribe_events();

    assert_ok!(client.connect("anonymous").await);
    server.wait_for_connections(1).await;

    server.close(1, 1011);
    let event = wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::Reconnecting { attempt: 1, .. })
    })
    .await;
    match event {
        ClientEvent::Reconnecting { delay, .. } => {
            assert_eq!(delay, Duration::from_millis(50));
        }
        _ => unreachable!(),
    }

    server.wait_for_connections(2).await;
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;
    assert_eq!(client.status(), ConnectionStatus::Connected);

    client.disconnect();
}

#[tokio::test]
async fn test_normal_close_does_not_reconnect() {
    let server = TestServer::spawn().await;
    let client = ChatClient::new(test_config(server.endpoint()));
    let mut events = client.subscribe_events();

    assert_ok!(client.connect("anonymous").await);
    server.wait_for_connections(1).await;

    server.close(1, 1000);
    wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::Disconnected { code: 1000 })
    })
    .await;

    // Long enough for the whole shrunk reconnect schedule to have fired
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.connection_count(), 1);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_subscriptions_replayed_exactly_once_after_reconnect() {
    let server = TestServer::spawn().await;
    let client = ChatClient::new(test_config(server.endpoint()));
    let mut events = client.subscribe_events();

    assert_ok!(client.connect("anonymous").await);
    server.wait_for_connections(1).await;

    assert!(client.subscribe_to_session(1));
    assert!(client.subscribe_to_session(2));

    server.close(1, 1011);
    server.wait_for_connections(2).await;
    // First Connected was consumed by nothing; drain up to the second one
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await;
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;

    // Give the replayed frames time to cross the socket
    tokio::time::sleep(Duration::from_millis(200)).await;

    let replayed: Vec<i64> = server
        .recorded()
        .into_iter()
        .filter(|(conn, _)| *conn == 2)
        .filter_map(|(_, frame)| match frame {
            ClientFrame::Subscribe { session_id } => Some(session_id),
            _ => None,
        })
        .collect();
    assert_eq!(replayed.len(), 2, "expected one replay per session: {replayed:?}");
    assert!(replayed.contains(&1));
    assert!(replayed.contains(&2));

    client.disconnect();
}

#[tokio::test]
async fn test_reconnect_exhaustion_emits_terminal_event() {
    let server = TestServer::spawn().await;
    let mut config = test_config(server.endpoint());
    config.max_reconnect_attempts = 3;
    let client = ChatClient::new(config);
    let mut events = client.subscribe_events();

    assert_ok!(client.connect("anonymous").await);
    server.wait_for_connections(1).await;

    // Stop accepting, then kill the live socket: every redial is refused
    server.shutdown();
    server.close(1, 1011);

    wait_for_event(&mut events, |e| matches!(e, ClientEvent::ReconnectsExhausted)).await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_send_after_disconnect_returns_false_and_writes_nothing() {
    let server = TestServer::spawn().await;
    let client = ChatClient::new(test_config(server.endpoint()));

    assert_ok!(client.connect("anonymous").await);
    server.wait_for_connections(1).await;
    client.disconnect();

    assert!(!client.send(ClientFrame::Ping {
        timestamp: Utc::now()
    }));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        server
            .recorded()
            .iter()
            .all(|(_, frame)| !matches!(frame, ClientFrame::Ping { .. })),
        "no ping should have crossed the socket"
    );
}

#[tokio::test]
async fn test_manual_reconnect_supersedes_pending_retry() {
    let server = TestServer::spawn().await;
    let mut config = test_config(server.endpoint());
    // One long pending retry we race with a manual connect
    config.reconnect_base_delay = Duration::from_millis(500);
    config.reconnect_max_delay = Duration::from_secs(2);
    let client = ChatClient::new(config);
    let mut events = client.subscribe_events();

    assert_ok!(client.connect("anonymous").await);
    server.wait_for_connections(1).await;

    server.close(1, 1011);
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await;

    // Manual re-init lands before the scheduled retry fires
    assert_ok!(client.connect("anonymous").await);
    server.wait_for_connections(2).await;

    // The stale retry must stand down instead of opening a third socket
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(server.connection_count(), 2);
    assert_eq!(client.status(), ConnectionStatus::Connected);

    client.disconnect();
}
