//! The push-delivery seam.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::subscription::SubscriptionRecord;

/// Delivers one encrypted notification to one subscriber.
///
/// The wire protocol (VAPID signing, payload encryption, HTTP) lives in the
/// implementation. Callers treat every attempt as independent.
#[async_trait]
pub trait PushService: Send + Sync + 'static {
    /// Send `payload` to the subscription's endpoint. The push service
    /// discards the message if it cannot deliver it within `ttl`.
    async fn send(
        &self,
        subscription: &SubscriptionRecord,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), DeliveryError>;
}
