//! Broadcast channel client: a thin seam over an external publish/subscribe
//! broker.
//!
//! The relay never talks to a concrete broker directly.  Sessions check a
//! [`PooledBroker`] out of the shared [`BrokerPool`] and use the [`Broker`]
//! and [`Subscription`] traits, so backends (and test doubles) are swapped by
//! constructing a different `Arc<dyn Broker>`.
//!
//! | Scheme      | Backend                                   |
//! |-------------|-------------------------------------------|
//! | `memory://` | [`MemoryBroker`], in-process fan-out       |
//! | `redis://`  | `RedisBroker` (`redis-backend` feature)    |

pub mod memory;
pub mod pool;
#[cfg(feature = "redis-backend")]
pub mod redis_backend;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryBroker;
pub use pool::{BrokerPool, PooledBroker};

/// Errors raised by broker backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The broker connection is down or the pool has been closed.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// A live subscription stream failed.
    #[error("subscription stream failed: {0}")]
    Stream(String),
    #[error("unsupported broker url `{0}`")]
    UnsupportedUrl(String),
}

/// One payload delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: String,
}

/// Publish side of the broker plus the subscription factory.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Fan `payload` out to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;

    /// Open a subscription to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// A live, cancellable stream of deliveries for one or more topics.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery.  `None` means the stream has ended.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no
    /// delivery and leaves the subscription usable.
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>>;

    /// Topics currently subscribed, in sorted order.
    fn topics(&self) -> Vec<String>;

    /// Stop receiving `topic`.  Unsubscribing a topic that is not subscribed
    /// is a no-op.
    async fn unsubscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    /// Drop every topic and release broker-side resources.
    async fn unsubscribe_all(&mut self) -> Result<(), BrokerError> {
        for topic in self.topics() {
            self.unsubscribe(&topic).await?;
        }
        Ok(())
    }
}

/// Build a broker from a connection string.
pub async fn connect(url: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(MemoryBroker::new()));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return connect_redis(url).await;
    }
    Err(BrokerError::UnsupportedUrl(url.to_owned()))
}

#[cfg(feature = "redis-backend")]
async fn connect_redis(url: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    Ok(Arc::new(redis_backend::RedisBroker::connect(url).await?))
}

#[cfg(not(feature = "redis-backend"))]
async fn connect_redis(url: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    Err(BrokerError::UnsupportedUrl(format!(
        "{url} (built without the redis-backend feature)"
    )))
}
