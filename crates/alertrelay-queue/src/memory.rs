//! In-memory durable queue.
//!
//! "Durable" only for the lifetime of the process: messages survive consumer
//! crashes (leases expire and the message is redelivered) but not a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use alertrelay_core::error::RelayError;
use alertrelay_core::queue::{DeliveryTag, DurableQueue, QueuedEnvelope};

/// Configuration for [`InMemoryQueue`].
#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// How long a received message stays invisible before redelivery.
    pub visibility_timeout: Duration,
    /// How long `receive` waits for a message before returning `None`.
    pub receive_wait: Duration,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(60),
            receive_wait: Duration::from_secs(1),
        }
    }
}

struct Stored {
    payload: Vec<u8>,
    delivery_count: u32,
}

struct Leased {
    message: Stored,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    next_tag: DeliveryTag,
    ready: VecDeque<Stored>,
    leased: HashMap<DeliveryTag, Leased>,
}

impl QueueState {
    /// Move expired leases back to the head of the queue, oldest tag first.
    fn reclaim_expired(&mut self, now: Instant) {
        let mut expired: Vec<DeliveryTag> = self
            .leased
            .iter()
            .filter(|(_, l)| l.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();
        expired.sort_unstable_by(|a, b| b.cmp(a));
        for tag in expired {
            if let Some(leased) = self.leased.remove(&tag) {
                self.ready.push_front(leased.message);
            }
        }
    }
}

/// Competing-consumer queue held in process memory.
pub struct InMemoryQueue {
    name: String,
    config: InMemoryQueueConfig,
    declared: AtomicBool,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>, config: InMemoryQueueConfig) -> Self {
        Self {
            name: name.into(),
            config,
            declared: AtomicBool::new(false),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Queue with default timeouts.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, InMemoryQueueConfig::default())
    }

    /// Messages waiting for a consumer (excludes leased ones).
    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    /// Messages received but not yet acknowledged or released.
    pub fn leased_len(&self) -> usize {
        self.state.lock().unwrap().leased.len()
    }

    pub fn is_declared(&self) -> bool {
        self.declared.load(Ordering::Acquire)
    }

    fn try_take(&self) -> Option<QueuedEnvelope> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        state.reclaim_expired(now);

        let mut message = state.ready.pop_front()?;
        message.delivery_count += 1;
        state.next_tag += 1;
        let tag = state.next_tag;

        let envelope = QueuedEnvelope {
            delivery_tag: tag,
            payload: message.payload.clone(),
            delivery_count: message.delivery_count,
        };
        state.leased.insert(
            tag,
            Leased { message, deadline: now + self.config.visibility_timeout },
        );
        Some(envelope)
    }

    fn ensure_declared(&self) -> Result<(), RelayError> {
        if self.is_declared() {
            Ok(())
        } else {
            Err(RelayError::Queue(format!("queue '{}' has not been declared", self.name)))
        }
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn declare(&self) -> Result<(), RelayError> {
        self.declared.store(true, Ordering::Release);
        Ok(())
    }

    async fn publish(&self, payload: &[u8]) -> Result<(), RelayError> {
        self.ensure_declared()?;
        self.state.lock().unwrap().ready.push_back(Stored {
            payload: payload.to_vec(),
            delivery_count: 0,
        });
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self) -> Result<Option<QueuedEnvelope>, RelayError> {
        self.ensure_declared()?;
        if let Some(envelope) = self.try_take() {
            return Ok(Some(envelope));
        }
        // Either a publish wakes us or the wait elapses; a lease may also
        // have expired in the meantime.
        let _ = tokio::time::timeout(self.config.receive_wait, self.notify.notified()).await;
        Ok(self.try_take())
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), RelayError> {
        match self.state.lock().unwrap().leased.remove(&tag) {
            Some(_) => Ok(()),
            None => Err(RelayError::Queue(format!("unknown delivery tag {tag}"))),
        }
    }

    async fn release(&self, tag: DeliveryTag) -> Result<(), RelayError> {
        let mut state = self.state.lock().unwrap();
        let leased = state
            .leased
            .remove(&tag)
            .ok_or_else(|| RelayError::Queue(format!("unknown delivery tag {tag}")))?;
        state.ready.push_front(leased.message);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }
}
