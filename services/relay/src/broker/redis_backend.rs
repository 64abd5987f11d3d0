//! Redis pub/sub backend (`redis-backend` feature).
//!
//! Publishes go over one shared multiplexed connection.  Each subscription
//! opens its own dedicated connection in pub/sub mode, which Redis requires,
//! and closes it when the handle is dropped.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::{MultiplexedConnection, PubSub};
use tracing::{debug, warn};

use super::{Broker, BrokerError, Delivery, Subscription};

pub struct RedisBroker {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisBroker {
    /// Open a client for `url` and verify it with an initial connection.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let publisher = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(unavailable)?;
        debug!(url, "redis broker connected");
        Ok(Self { client, publisher })
    }
}

fn unavailable(e: redis::RedisError) -> BrokerError {
    BrokerError::Unavailable(e.to_string())
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.publisher.clone();
        let _receivers: i64 = conn.publish(topic, payload).await.map_err(unavailable)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(unavailable)?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(topic).await.map_err(unavailable)?;
        let mut topics = BTreeSet::new();
        topics.insert(topic.to_owned());
        Ok(Box::new(RedisSubscription { pubsub, topics }))
    }
}

struct RedisSubscription {
    pubsub: PubSub,
    topics: BTreeSet<String>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>> {
        if self.topics.is_empty() {
            return None;
        }
        loop {
            let msg = self.pubsub.on_message().next().await?;
            let topic = msg.get_channel_name().to_owned();
            match msg.get_payload::<String>() {
                Ok(payload) => return Some(Ok(Delivery { topic, payload })),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "dropping non-text redis payload");
                }
            }
        }
    }

    fn topics(&self) -> Vec<String> {
        self.topics.iter().cloned().collect()
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        if !self.topics.remove(topic) {
            return Ok(());
        }
        self.pubsub
            .unsubscribe(topic)
            .await
            .map_err(|e| BrokerError::Stream(e.to_string()))
    }
}
