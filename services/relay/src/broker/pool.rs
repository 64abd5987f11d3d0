//! Bounded pool of broker connections shared by every session.
//!
//! A session checks out one slot when it sets up its subscription and holds it
//! until teardown.  With every slot taken, [`BrokerPool::checkout`] waits for a
//! session to end, which bounds the number of broker connections a relay
//! instance holds open.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::{Broker, BrokerError, Subscription};

/// Default number of concurrent broker connections.
pub const DEFAULT_POOL_SIZE: usize = 5;

#[derive(Clone)]
pub struct BrokerPool {
    broker: Arc<dyn Broker>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl BrokerPool {
    pub fn new(broker: Arc<dyn Broker>, capacity: usize) -> Self {
        Self {
            broker,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently checked out.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot.  Fails only once the pool has been closed.
    pub async fn checkout(&self) -> Result<PooledBroker, BrokerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| BrokerError::Unavailable("broker pool closed".to_owned()))?;
        debug!(available = self.available(), "broker slot checked out");
        Ok(PooledBroker {
            broker: Arc::clone(&self.broker),
            _permit: permit,
        })
    }

    /// Refuse further checkouts.  Slots already held stay valid until dropped.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }
}

/// A checked-out broker slot; the slot is returned when this is dropped.
pub struct PooledBroker {
    broker: Arc<dyn Broker>,
    _permit: OwnedSemaphorePermit,
}

impl PooledBroker {
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.broker.publish(topic, payload).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        self.broker.subscribe(topic).await
    }
}
