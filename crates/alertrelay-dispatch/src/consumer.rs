//! `QueueConsumer`: drains the durable queue into notification batches.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use alertrelay_core::dedup::RecentKeys;
use alertrelay_core::error::RelayError;
use alertrelay_core::payload::NotificationPayload;
use alertrelay_core::queue::{DurableQueue, QueuedEnvelope};

use crate::dispatcher::{DispatchReport, NotificationDispatcher};
use crate::matcher::SubscriptionMatcher;

/// When a received message is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Ack as soon as the message arrives. A crash mid-fan-out loses the
    /// rest of that batch.
    OnReceipt,
    /// Ack once the fan-out finished. A crash mid-fan-out redelivers the
    /// message; the dedup guard keeps a finished batch from repeating.
    #[default]
    AfterDispatch,
}

impl FromStr for AckMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on-receipt" | "on_receipt" | "receipt" => Ok(Self::OnReceipt),
            "after-dispatch" | "after_dispatch" | "dispatch" => Ok(Self::AfterDispatch),
            other => Err(RelayError::Config(format!(
                "unknown ack mode {other:?} (expected on-receipt or after-dispatch)"
            ))),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnReceipt => write!(f, "on-receipt"),
            Self::AfterDispatch => write!(f, "after-dispatch"),
        }
    }
}

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub ack_mode: AckMode,
    /// After-dispatch mode only: a message whose subscriber lookup keeps
    /// failing is dropped once it has been delivered this many times.
    pub max_deliveries: u32,
    /// How many recently dispatched events the dedup guard remembers.
    pub dedup_window: usize,
    /// Pause after a failed receive before trying again.
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::AfterDispatch,
            max_deliveries: 5,
            dedup_window: 1024,
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Metrics snapshot for the consumer side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerMetrics {
    pub received: u64,
    pub redelivered: u64,
    pub decode_errors: u64,
    pub duplicates: u64,
    pub lookup_errors: u64,
    pub batches: u64,
    pub dropped: u64,
    pub notifications_delivered: u64,
    pub notifications_failed: u64,
    pub queue_errors: u64,
}

/// What happened to one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Fanned out; the report covers every matched subscriber.
    Dispatched(DispatchReport),
    /// Already dispatched recently; acked without sending.
    Duplicate,
    /// Undecodable body; acked and discarded.
    Malformed,
    /// Subscriber lookup failed. `requeued` tells whether the message was
    /// handed back for another attempt.
    LookupFailed { requeued: bool },
}

/// Pulls events off the queue and runs each through matcher and dispatcher.
///
/// Share one instance between worker tasks via `Arc`; each calls
/// [`run`](Self::run). The dedup guard and metrics are per instance.
pub struct QueueConsumer {
    queue: Arc<dyn DurableQueue>,
    matcher: SubscriptionMatcher,
    dispatcher: NotificationDispatcher,
    config: ConsumerConfig,
    dispatched: Mutex<RecentKeys>,
    metrics: Arc<Mutex<ConsumerMetrics>>,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        matcher: SubscriptionMatcher,
        dispatcher: NotificationDispatcher,
        config: ConsumerConfig,
    ) -> Self {
        let dispatched = Mutex::new(RecentKeys::new(config.dedup_window));
        Self {
            queue,
            matcher,
            dispatcher,
            config,
            dispatched,
            metrics: Arc::new(Mutex::new(ConsumerMetrics::default())),
        }
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> ConsumerMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Declare the queue and consume until `shutdown` resolves.
    ///
    /// Shutdown is checked between messages only; a batch already being
    /// dispatched runs to completion first. Errors only if the queue cannot
    /// be declared.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), RelayError> {
        self.queue.declare().await?;
        tokio::pin!(shutdown);

        info!(
            queue = %self.queue.name(),
            ack_mode = %self.config.ack_mode,
            "QueueConsumer waiting for messages"
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                received = self.queue.receive() => received,
            };

            match received {
                Ok(Some(envelope)) => {
                    self.process(envelope).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "queue receive failed");
                    self.metrics.lock().unwrap().queue_errors += 1;
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        info!(queue = %self.queue.name(), "QueueConsumer stopped");
        Ok(())
    }

    /// Handle one envelope end to end, acking or releasing it per the ack
    /// mode.
    pub async fn process(&self, envelope: QueuedEnvelope) -> ProcessOutcome {
        let tag = envelope.delivery_tag;
        let after_dispatch = self.config.ack_mode == AckMode::AfterDispatch;
        {
            let mut m = self.metrics.lock().unwrap();
            m.received += 1;
            if envelope.is_redelivery() {
                m.redelivered += 1;
            }
        }

        if !after_dispatch {
            self.ack(tag).await;
        }

        let event = match envelope.decode() {
            Ok(event) => event,
            Err(e) => {
                warn!(delivery_tag = tag, error = %e, "discarding undecodable message");
                self.metrics.lock().unwrap().decode_errors += 1;
                if after_dispatch {
                    self.ack(tag).await;
                }
                return ProcessOutcome::Malformed;
            }
        };

        let key = event.dedup_key();
        if after_dispatch && self.dispatched.lock().unwrap().contains(&key) {
            info!(%key, delivery_count = envelope.delivery_count, "event already dispatched, acking");
            self.metrics.lock().unwrap().duplicates += 1;
            self.ack(tag).await;
            return ProcessOutcome::Duplicate;
        }

        info!(
            world_id = %event.world_id,
            zone_id = %event.zone_id,
            instance_id = %event.instance_id,
            delivery_count = envelope.delivery_count,
            "alert received from queue"
        );

        let subscribers = match self.matcher.find_subscribers(&event.world_id).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                error!(world_id = %event.world_id, error = %e, "subscriber lookup failed");
                self.metrics.lock().unwrap().lookup_errors += 1;
                if !after_dispatch {
                    return ProcessOutcome::LookupFailed { requeued: false };
                }
                if !e.is_retryable() {
                    error!(delivery_tag = tag, "lookup error is not retryable, dropping message");
                    self.metrics.lock().unwrap().dropped += 1;
                    self.ack(tag).await;
                    return ProcessOutcome::LookupFailed { requeued: false };
                }
                return self.give_back(&envelope).await;
            }
        };

        let payload = NotificationPayload::for_event(&event);
        let report = match self.dispatcher.dispatch(&payload, &subscribers).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "notification payload could not be built");
                if after_dispatch {
                    self.ack(tag).await;
                }
                return ProcessOutcome::Malformed;
            }
        };

        self.dispatched.lock().unwrap().insert(key);
        {
            let mut m = self.metrics.lock().unwrap();
            m.batches += 1;
            m.notifications_delivered += report.delivered as u64;
            m.notifications_failed += report.failed() as u64;
        }
        if after_dispatch {
            self.ack(tag).await;
        }
        ProcessOutcome::Dispatched(report)
    }

    /// Release for another attempt, or drop once the delivery budget is spent.
    async fn give_back(&self, envelope: &QueuedEnvelope) -> ProcessOutcome {
        let tag = envelope.delivery_tag;
        if envelope.delivery_count >= self.config.max_deliveries {
            error!(
                delivery_tag = tag,
                delivery_count = envelope.delivery_count,
                "giving up on message after repeated lookup failures"
            );
            self.metrics.lock().unwrap().dropped += 1;
            self.ack(tag).await;
            return ProcessOutcome::LookupFailed { requeued: false };
        }

        match self.queue.release(tag).await {
            Ok(()) => debug!(delivery_tag = tag, "message released for redelivery"),
            Err(e) => {
                // The lease still runs out on its own.
                warn!(delivery_tag = tag, error = %e, "release failed");
                self.metrics.lock().unwrap().queue_errors += 1;
            }
        }
        ProcessOutcome::LookupFailed { requeued: true }
    }

    async fn ack(&self, tag: u64) {
        if let Err(e) = self.queue.ack(tag).await {
            warn!(delivery_tag = tag, error = %e, "ack failed; message may be redelivered");
            self.metrics.lock().unwrap().queue_errors += 1;
        }
    }
}
