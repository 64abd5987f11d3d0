//! End-to-end chat scenarios against an in-process relay.
//!
//! # Coverage
//! - A lone client is announced and sees its own join.
//! - A message from one client reaches every client, attributed to its sender.
//! - A malformed message disconnects only its sender.
//! - Departures are announced to the clients that remain.

use chat_relay::protocol::{ChatMessage, MessageKind, SERVER_SENDER};
use chat_relay::service::broker::{BrokerPool, MemoryBroker};
use chat_relay::service::config::RelayConfig;
use chat_relay::service::state::AppState;
use chat_test_utils::MockWsClient;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

/// Spin up an in-process relay and return its WebSocket URL.
async fn start_relay() -> String {
    let pool = BrokerPool::new(Arc::new(MemoryBroker::new()), 5);
    let state = AppState::new(pool, RelayConfig::default());
    let router = chat_relay::service::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind relay");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn join(url: &str) -> (MockWsClient, String) {
    let (mut client, id) = MockWsClient::connect_and_identify(url)
        .await
        .expect("connect");
    let joined = format!("{id} connected");
    client
        .recv_until(WAIT, |m| m.sender() == SERVER_SENDER && m.body() == joined)
        .await
        .expect("own join announcement");
    (client, id)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lone_client_is_announced_and_sees_its_join() {
    let url = start_relay().await;
    let mut client = MockWsClient::connect(&url).await.unwrap();

    let first = client.recv_message().await.unwrap();
    assert_eq!(first.kind(), MessageKind::IdentityAnnouncement);
    assert_eq!(first.sender(), SERVER_SENDER);
    let id = first.body().to_owned();

    let second = client.recv_message().await.unwrap();
    assert_eq!(second.kind(), MessageKind::Plain);
    assert_eq!(second.sender(), SERVER_SENDER);
    assert_eq!(second.body(), format!("{id} connected"));
}

#[tokio::test]
async fn chat_between_two_clients() {
    let url = start_relay().await;
    let (mut a, id_a) = join(&url).await;
    let (mut b, id_b) = join(&url).await;
    a.recv_until(WAIT, |m| m.body() == format!("{id_b} connected"))
        .await
        .unwrap();

    a.send_message(&ChatMessage::plain(id_a.as_str(), "hi")).await.unwrap();
    let at_a = a.recv_message().await.unwrap();
    let at_b = b.recv_message().await.unwrap();
    for got in [&at_a, &at_b] {
        assert_eq!(got.sender(), id_a);
        assert_eq!(got.body(), "hi");
    }

    b.send_message(&ChatMessage::plain(id_b.as_str(), "hello back"))
        .await
        .unwrap();
    assert_eq!(a.recv_message().await.unwrap().sender(), id_b);
    assert_eq!(b.recv_message().await.unwrap().body(), "hello back");
}

#[tokio::test]
async fn malformed_message_disconnects_only_its_sender() {
    let url = start_relay().await;
    let (mut a, id_a) = join(&url).await;
    let (mut b, id_b) = join(&url).await;
    a.recv_until(WAIT, |m| m.body() == format!("{id_b} connected"))
        .await
        .unwrap();

    a.send_text(r#"{"type":"message","sender":"x"}"#).await.unwrap();
    assert!(a.wait_for_close(WAIT).await);

    let left = b.recv_message().await.unwrap();
    assert_eq!(left.sender(), SERVER_SENDER);
    assert_eq!(left.body(), format!("{id_a} disconnected"));
    assert!(b.recv_message_timeout(QUIET).await.unwrap().is_none());
}

#[tokio::test]
async fn departure_is_announced_to_remaining_clients() {
    let url = start_relay().await;
    let (mut a, _) = join(&url).await;
    let (mut b, id_b) = join(&url).await;
    let (mut c, id_c) = join(&url).await;
    for client in [&mut a, &mut b] {
        client
            .recv_until(WAIT, |m| m.body() == format!("{id_c} connected"))
            .await
            .unwrap();
    }
    b.close().await.unwrap();
    drop(b);

    for client in [&mut a, &mut c] {
        let left = client
            .recv_until(WAIT, |m| m.sender() == SERVER_SENDER)
            .await
            .unwrap();
        assert_eq!(left.body(), format!("{id_b} disconnected"));
    }
}
