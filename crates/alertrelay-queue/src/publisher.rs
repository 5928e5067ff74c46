//! `QueuePublisher`: puts relay-worthy events on the durable queue.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use alertrelay_core::error::RelayError;
use alertrelay_core::event::GameEvent;
use alertrelay_core::queue::DurableQueue;

/// Publishes events to one durable queue, declaring it on first use.
///
/// A failed declare is not remembered: the next publish tries again.
pub struct QueuePublisher {
    queue: Arc<dyn DurableQueue>,
    declared: OnceCell<()>,
}

impl QueuePublisher {
    pub fn new(queue: Arc<dyn DurableQueue>) -> Self {
        Self { queue, declared: OnceCell::new() }
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Declare the queue now rather than on the first publish.
    pub async fn ensure_declared(&self) -> Result<(), RelayError> {
        self.declared
            .get_or_try_init(|| async {
                info!(queue = %self.queue.name(), "declaring queue if absent");
                self.queue.declare().await
            })
            .await?;
        Ok(())
    }

    /// Enqueue the event's raw payload.
    pub async fn publish(&self, event: &GameEvent) -> Result<(), RelayError> {
        self.ensure_declared().await?;
        let body = event.to_bytes()?;
        self.queue.publish(&body).await?;
        debug!(
            instance_id = %event.instance_id,
            queue = %self.queue.name(),
            bytes = body.len(),
            "event queued"
        );
        Ok(())
    }
}
