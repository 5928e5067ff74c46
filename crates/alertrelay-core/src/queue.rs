//! The durable queue abstraction.

use async_trait::async_trait;

use crate::error::RelayError;
use crate::event::GameEvent;

/// Queue-assigned handle used to acknowledge or release a delivery.
pub type DeliveryTag = u64;

/// A message taken off the durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEnvelope {
    pub delivery_tag: DeliveryTag,
    /// UTF-8 JSON of the raw upstream event.
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

impl QueuedEnvelope {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    pub fn decode(&self) -> Result<GameEvent, RelayError> {
        GameEvent::from_slice(&self.payload)
    }
}

/// A named, durable, competing-consumer queue.
///
/// A received envelope stays invisible to other consumers until it is
/// acknowledged (removed for good), released (made visible again), or its
/// visibility timeout lapses (redelivered).
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; publishers and consumers share
/// one instance per process through an `Arc`.
#[async_trait]
pub trait DurableQueue: Send + Sync + 'static {
    /// Queue name.
    fn name(&self) -> &str;

    /// Create the queue if it does not exist. Idempotent.
    async fn declare(&self) -> Result<(), RelayError>;

    /// Append a message body.
    async fn publish(&self, payload: &[u8]) -> Result<(), RelayError>;

    /// Take the next visible message, waiting a bounded time for one to
    /// arrive. `Ok(None)` means the wait elapsed with nothing to deliver.
    async fn receive(&self) -> Result<Option<QueuedEnvelope>, RelayError>;

    /// Remove a delivered message permanently.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), RelayError>;

    /// Return a delivered message to the queue for redelivery.
    async fn release(&self, tag: DeliveryTag) -> Result<(), RelayError>;
}
