//! In-process broker built on `tokio::sync::broadcast`.
//!
//! One broadcast channel per topic, created on first use and kept in a
//! registry.  Suitable for a single relay instance and for tests; it provides
//! the same fan-out semantics the relay expects from an external broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use super::{Broker, BrokerError, Delivery, Subscription};

/// Pending payloads per subscriber before it starts lagging.
const TOPIC_CAPACITY: usize = 1024;

type TopicRegistry = Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>;

#[derive(Clone, Default)]
pub struct MemoryBroker {
    topics: TopicRegistry,
    closed: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Close every topic.  Live subscriptions drain what they already
    /// received and then end; later publish/subscribe calls fail with
    /// [`BrokerError::Unavailable`].
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.write().await.clear();
        debug!("memory broker shut down");
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("memory broker shut down".to_owned()));
        }
        Ok(())
    }

    async fn get_or_create_topic(&self, topic: &str) -> broadcast::Sender<String> {
        {
            let reg = self.topics.read().await;
            if let Some(tx) = reg.get(topic) {
                return tx.clone();
            }
        }
        let mut reg = self.topics.write().await;
        if let Some(tx) = reg.get(topic) {
            return tx.clone();
        }
        let (tx, _rx) = broadcast::channel(TOPIC_CAPACITY);
        reg.insert(topic.to_owned(), tx.clone());
        tx
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let reg = self.topics.read().await;
        if let Some(tx) = reg.get(topic) {
            // Zero subscribers is not an error: the payload simply has no audience.
            let _ = tx.send(payload.to_owned());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        self.ensure_open()?;
        let rx = self.get_or_create_topic(topic).await.subscribe();
        let mut streams = StreamMap::new();
        streams.insert(topic.to_owned(), BroadcastStream::new(rx));
        Ok(Box::new(MemorySubscription { streams }))
    }
}

struct MemorySubscription {
    streams: StreamMap<String, BroadcastStream<String>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>> {
        loop {
            match self.streams.next().await? {
                (topic, Ok(payload)) => return Some(Ok(Delivery { topic, payload })),
                (topic, Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(topic = %topic, skipped, "subscriber lagged, skipping payloads");
                }
            }
        }
    }

    fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.streams.keys().cloned().collect();
        topics.sort();
        topics
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.streams.remove(topic);
        Ok(())
    }
}
