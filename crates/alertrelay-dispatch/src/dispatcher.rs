//! `NotificationDispatcher`: bounded fan-out of one payload to many
//! subscribers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use alertrelay_core::error::{DeliveryError, FailureKind, RelayError};
use alertrelay_core::payload::NotificationPayload;
use alertrelay_core::push::PushService;
use alertrelay_core::subscription::SubscriptionRecord;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time-to-live handed to the push service (default: 300s).
    pub ttl: Duration,
    /// Maximum deliveries in flight at once (default: 16).
    pub concurrency: usize,
    /// Per-delivery ceiling; an attempt that exceeds it counts as transient.
    pub delivery_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            concurrency: 16,
            delivery_timeout: Duration::from_secs(15),
        }
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Endpoints the push service rejected for good (gone, invalid keys).
    pub permanent_failures: Vec<String>,
    /// Endpoints that may succeed on a later attempt.
    pub transient_failures: Vec<String>,
}

impl DispatchReport {
    pub fn failed(&self) -> usize {
        self.permanent_failures.len() + self.transient_failures.len()
    }

    fn record(&mut self, endpoint: String, result: Result<(), DeliveryError>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(e) => match e.kind {
                FailureKind::Permanent => self.permanent_failures.push(endpoint),
                FailureKind::Transient => self.transient_failures.push(endpoint),
            },
        }
    }
}

/// Sends a notification to every matched subscriber.
///
/// Each subscriber gets an independent attempt; one failure never stops the
/// rest of the batch. No retries are made here.
pub struct NotificationDispatcher {
    push: Arc<dyn PushService>,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    pub fn new(push: Arc<dyn PushService>, config: DispatcherConfig) -> Self {
        Self { push, config }
    }

    /// Deliver `payload` to all `subscribers`, at most `concurrency` at a time.
    ///
    /// Only fails if the payload cannot be serialized; per-subscriber errors
    /// end up in the report.
    pub async fn dispatch(
        &self,
        payload: &NotificationPayload,
        subscribers: &[SubscriptionRecord],
    ) -> Result<DispatchReport, RelayError> {
        let body: Arc<[u8]> = payload.to_json_bytes()?.into();
        let started = Instant::now();
        let mut report = DispatchReport {
            attempted: subscribers.len(),
            ..DispatchReport::default()
        };

        if subscribers.is_empty() {
            info!(title = %payload.title, "no subscribers for this world");
            return Ok(report);
        }

        // Owned records and a shared body keep the batch future `Send`.
        let results: Vec<(String, Result<(), DeliveryError>)> = stream::iter(subscribers.iter().cloned())
            .map(|sub| {
                let body = Arc::clone(&body);
                async move {
                    let result = self.deliver(&sub, &body).await;
                    (sub.endpoint, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (endpoint, result) in results {
            report.record(endpoint, result);
        }

        info!(
            title = %payload.title,
            attempted = report.attempted,
            delivered = report.delivered,
            permanent = report.permanent_failures.len(),
            transient = report.transient_failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "notification batch finished"
        );
        Ok(report)
    }

    async fn deliver(&self, sub: &SubscriptionRecord, body: &[u8]) -> Result<(), DeliveryError> {
        let attempt = self.push.send(sub, body, self.config.ttl);
        let result = match tokio::time::timeout(self.config.delivery_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::transient(format!(
                "no response within {}s",
                self.config.delivery_timeout.as_secs()
            ))),
        };

        match &result {
            Ok(()) => debug!(endpoint = %sub.endpoint, "notification delivered"),
            Err(e) if e.is_permanent() => {
                warn!(endpoint = %sub.endpoint, reason = %e.reason, "subscription rejected by push service")
            }
            Err(e) => error!(endpoint = %sub.endpoint, reason = %e.reason, "notification delivery failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertrelay_core::subscription::PushKeys;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn subscribers(n: usize) -> Vec<SubscriptionRecord> {
        (0..n)
            .map(|i| {
                SubscriptionRecord::new(
                    format!("https://push.example/{i}"),
                    PushKeys { auth: "a".into(), p256dh: "p".into() },
                    ["1"],
                )
            })
            .collect()
    }

    fn payload() -> NotificationPayload {
        NotificationPayload::alert_started(&"1".into(), &"2".into())
    }

    /// Fails listed endpoints and records the highest observed concurrency.
    #[derive(Default)]
    struct Recorder {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        sent: Mutex<Vec<(String, Vec<u8>, Duration)>>,
        fail_permanent: Vec<String>,
        fail_transient: Vec<String>,
    }

    #[async_trait]
    impl PushService for Recorder {
        async fn send(
            &self,
            sub: &SubscriptionRecord,
            payload: &[u8],
            ttl: Duration,
        ) -> Result<(), DeliveryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.sent
                .lock()
                .unwrap()
                .push((sub.endpoint.clone(), payload.to_vec(), ttl));
            if self.fail_permanent.contains(&sub.endpoint) {
                return Err(DeliveryError::permanent("endpoint_not_found"));
            }
            if self.fail_transient.contains(&sub.endpoint) {
                return Err(DeliveryError::transient("server_error"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn every_subscriber_gets_one_attempt() {
        let push = Arc::new(Recorder::default());
        let dispatcher = NotificationDispatcher::new(push.clone(), DispatcherConfig::default());

        let report = dispatcher.dispatch(&payload(), &subscribers(5)).await.unwrap();
        assert_eq!(report.attempted, 5);
        assert_eq!(report.delivered, 5);
        assert_eq!(report.failed(), 0);

        let sent = push.sent.lock().unwrap();
        assert_eq!(sent.len(), 5);
        let expected = payload().to_json_bytes().unwrap();
        assert!(sent.iter().all(|(_, body, ttl)| *body == expected && *ttl == Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let push = Arc::new(Recorder {
            fail_permanent: vec!["https://push.example/1".into()],
            fail_transient: vec!["https://push.example/3".into()],
            ..Recorder::default()
        });
        let dispatcher = NotificationDispatcher::new(push.clone(), DispatcherConfig::default());

        let report = dispatcher.dispatch(&payload(), &subscribers(5)).await.unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.permanent_failures, vec!["https://push.example/1".to_string()]);
        assert_eq!(report.transient_failures, vec!["https://push.example/3".to_string()]);
        assert_eq!(push.sent.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let push = Arc::new(Recorder::default());
        let config = DispatcherConfig { concurrency: 3, ..DispatcherConfig::default() };
        let dispatcher = NotificationDispatcher::new(push.clone(), config);

        let report = dispatcher.dispatch(&payload(), &subscribers(20)).await.unwrap();
        assert_eq!(report.delivered, 20);
        let peak = push.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak > 1, "deliveries never overlapped");
    }

    #[tokio::test]
    async fn zero_concurrency_still_progresses() {
        let push = Arc::new(Recorder::default());
        let config = DispatcherConfig { concurrency: 0, ..DispatcherConfig::default() };
        let dispatcher = NotificationDispatcher::new(push, config);
        assert_eq!(dispatcher.dispatch(&payload(), &subscribers(2)).await.unwrap().delivered, 2);
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let push = Arc::new(Recorder::default());
        let dispatcher = NotificationDispatcher::new(push.clone(), DispatcherConfig::default());
        let report = dispatcher.dispatch(&payload(), &[]).await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert!(push.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_runs_on_a_spawned_task() {
        let push = Arc::new(Recorder::default());
        let dispatcher = Arc::new(NotificationDispatcher::new(push.clone(), DispatcherConfig::default()));

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(&payload(), &subscribers(4)).await }
        });
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.delivered, 4);
        assert_eq!(push.sent.lock().unwrap().len(), 4);
    }

    struct Hangs;

    #[async_trait]
    impl PushService for Hangs {
        async fn send(&self, _: &SubscriptionRecord, _: &[u8], _: Duration) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_endpoint_times_out_as_transient() {
        let config = DispatcherConfig {
            delivery_timeout: Duration::from_secs(2),
            ..DispatcherConfig::default()
        };
        let dispatcher = NotificationDispatcher::new(Arc::new(Hangs), config);
        let report = dispatcher.dispatch(&payload(), &subscribers(2)).await.unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.transient_failures.len(), 2);
    }
}
