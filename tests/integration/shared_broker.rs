//! Two relay instances on one broker behave as a single chat room.
//!
//! Clients attached to different relays see each other's joins, messages and
//! departures because every relay publishes to and subscribes from the same
//! broker topic.

use chat_relay::protocol::{ChatMessage, SERVER_SENDER};
use chat_relay::service::broker::{Broker, BrokerPool, MemoryBroker};
use chat_relay::service::config::RelayConfig;
use chat_relay::service::state::AppState;
use chat_test_utils::MockWsClient;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay(broker: Arc<dyn Broker>) -> String {
    let state = AppState::new(BrokerPool::new(broker, 5), RelayConfig::default());
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

#[tokio::test]
async fn clients_on_different_relays_share_the_topic() {
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let east = start_relay(Arc::clone(&broker)).await;
    let west = start_relay(Arc::clone(&broker)).await;

    let (mut a, id_a) = MockWsClient::connect_and_identify(&east).await.unwrap();
    a.recv_until(WAIT, |m| m.body() == format!("{id_a} connected"))
        .await
        .unwrap();

    let (mut b, id_b) = MockWsClient::connect_and_identify(&west).await.unwrap();
    b.recv_until(WAIT, |m| m.body() == format!("{id_b} connected"))
        .await
        .unwrap();
    a.recv_until(WAIT, |m| m.body() == format!("{id_b} connected"))
        .await
        .unwrap();

    b.send_message(&ChatMessage::plain("", "across relays")).await.unwrap();
    let got = a.recv_message().await.unwrap();
    assert_eq!(got.sender(), id_b);
    assert_eq!(got.body(), "across relays");

    b.close().await.unwrap();
    drop(b);
    let left = a
        .recv_until(WAIT, |m| m.sender() == SERVER_SENDER)
        .await
        .unwrap();
    assert_eq!(left.body(), format!("{id_b} disconnected"));
}
