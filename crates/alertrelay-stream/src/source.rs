//! `EventSource`: turns stream signals into queued relay events.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use alertrelay_core::error::RelayError;
use alertrelay_core::event::GameEvent;
use alertrelay_core::filter::{EventFilter, FilterVerdict};
use alertrelay_queue::QueuePublisher;

use crate::client::{StreamCommand, StreamSignal};

/// Configuration for [`EventSource`].
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Re-issue the subscription this often even if the connection looks
    /// healthy. The upstream can stop delivering without closing the socket.
    /// Values below [`MIN_RESUBSCRIBE_INTERVAL`] are raised to it.
    pub resubscribe_interval: Duration,
}

/// Floor for [`SourceConfig::resubscribe_interval`].
pub const MIN_RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(1);

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            resubscribe_interval: Duration::from_secs(120),
        }
    }
}

/// Metrics snapshot for the producer side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetrics {
    pub events_received: u64,
    pub events_relayed: u64,
    pub events_filtered: u64,
    pub duplicates: u64,
    pub publish_errors: u64,
    pub warnings: u64,
    pub heartbeats: u64,
    pub resubscribes: u64,
    pub reconnections: u64,
}

/// The producer loop: filter every streamed event and queue the relay-worthy
/// ones.
///
/// Handles signals strictly in arrival order. Nothing here is fatal except
/// the stream task going away entirely.
pub struct EventSource {
    filter: EventFilter,
    publisher: Arc<QueuePublisher>,
    config: SourceConfig,
    metrics: Arc<Mutex<SourceMetrics>>,
}

impl EventSource {
    pub fn new(filter: EventFilter, publisher: Arc<QueuePublisher>, mut config: SourceConfig) -> Self {
        if config.resubscribe_interval < MIN_RESUBSCRIBE_INTERVAL {
            warn!(
                requested_ms = config.resubscribe_interval.as_millis() as u64,
                "resubscribe interval too short, using 1s"
            );
            config.resubscribe_interval = MIN_RESUBSCRIBE_INTERVAL;
        }
        Self {
            filter,
            publisher,
            config,
            metrics: Arc::new(Mutex::new(SourceMetrics::default())),
        }
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> SourceMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Run until `shutdown` resolves or the stream task ends.
    ///
    /// `signals` and `commands` are the two ends of a
    /// [`CensusClient`](crate::client::CensusClient). Returns an error only
    /// if the signal channel closes, i.e. the stream task is gone.
    pub async fn run(
        &self,
        mut signals: mpsc::UnboundedReceiver<StreamSignal>,
        commands: mpsc::UnboundedSender<StreamCommand>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), RelayError> {
        let period = self.config.resubscribe_interval;
        let mut resubscribe = time::interval_at(Instant::now() + period, period);
        resubscribe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            queue = %self.publisher.queue_name(),
            resubscribe_secs = period.as_secs(),
            "EventSource starting"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("EventSource shutting down");
                    let _ = commands.send(StreamCommand::Close);
                    return Ok(());
                }
                _ = resubscribe.tick() => {
                    info!("rerunning upstream subscription");
                    self.metrics.lock().unwrap().resubscribes += 1;
                    if commands.send(StreamCommand::Resubscribe).is_err() {
                        warn!("resubscribe skipped: stream task not accepting commands");
                    }
                }
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        error!("upstream stream task ended");
                        return Err(RelayError::Transport("upstream stream task ended".into()));
                    }
                }
            }
        }
    }

    async fn handle_signal(&self, signal: StreamSignal) {
        match signal {
            StreamSignal::Ready => info!("client ready and listening for MetagameEvents"),
            StreamSignal::Subscribed { worlds } => info!(worlds, "subscription acknowledged"),
            StreamSignal::Heartbeat => {
                debug!("heartbeat");
                self.metrics.lock().unwrap().heartbeats += 1;
            }
            StreamSignal::ServiceState { detail, online } => {
                if online {
                    info!(%detail, "upstream feed online");
                } else {
                    warn!(%detail, "upstream feed offline");
                }
            }
            StreamSignal::Duplicate { key } => {
                info!(%key, "duplicate event received, ignoring");
                self.metrics.lock().unwrap().duplicates += 1;
            }
            StreamSignal::Warn(text) => {
                warn!(message = %text, "corrupt or unrecognised upstream message");
                self.metrics.lock().unwrap().warnings += 1;
            }
            StreamSignal::Disconnected { reason } => warn!(%reason, "client disconnected"),
            StreamSignal::Reconnecting { attempt, delay } => {
                info!(attempt, ?delay, "client reconnecting");
                self.metrics.lock().unwrap().reconnections += 1;
            }
            StreamSignal::Error(reason) => error!(%reason, "stream client error"),
            StreamSignal::Event(event) => self.relay(event).await,
        }
    }

    async fn relay(&self, event: GameEvent) {
        self.metrics.lock().unwrap().events_received += 1;

        let verdict = self.filter.check(&event);
        if verdict != FilterVerdict::Relay {
            info!(
                instance_id = %event.instance_id,
                world_id = %event.world_id,
                zone_id = %event.zone_id,
                state = %event.state_name,
                %verdict,
                "MetagameEvent doesn't meet the criteria"
            );
            self.metrics.lock().unwrap().events_filtered += 1;
            return;
        }

        info!(
            instance_id = %event.instance_id,
            world_id = %event.world_id,
            zone_id = %event.zone_id,
            "MetagameEvent meets criteria, sending to queue"
        );
        match self.publisher.publish(&event).await {
            Ok(()) => self.metrics.lock().unwrap().events_relayed += 1,
            Err(e) => {
                // No local buffer: the event is lost.
                error!(instance_id = %event.instance_id, error = %e, "failed to queue MetagameEvent");
                self.metrics.lock().unwrap().publish_errors += 1;
            }
        }
    }
}
