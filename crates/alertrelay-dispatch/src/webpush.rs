//! Web Push delivery over VAPID-signed, aes128gcm-encrypted requests.

use std::time::Duration;

use async_trait::async_trait;
use web_push::{
    ContentEncoding, HyperWebPushClient, PartialVapidSignatureBuilder, SubscriptionInfo,
    VapidSignatureBuilder, WebPushClient, WebPushError, WebPushMessageBuilder,
};

use alertrelay_core::error::{DeliveryError, RelayError};
use alertrelay_core::push::PushService;
use alertrelay_core::subscription::SubscriptionRecord;

/// VAPID identity of this application server.
#[derive(Clone)]
pub struct VapidConfig {
    /// Contact address sent as the `sub` claim. A bare address gets a
    /// `mailto:` prefix.
    pub contact: String,
    /// URL-safe base64 public key (what browsers subscribe with).
    pub public_key: String,
    /// URL-safe base64 private key.
    pub private_key: String,
}

impl std::fmt::Debug for VapidConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidConfig")
            .field("contact", &self.contact)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl VapidConfig {
    /// The `sub` claim value.
    pub fn subject(&self) -> String {
        if self.contact.starts_with("mailto:") || self.contact.starts_with("https:") {
            self.contact.clone()
        } else {
            format!("mailto:{}", self.contact)
        }
    }
}

/// [`PushService`] backed by the `web-push` crate.
pub struct WebPushService {
    client: HyperWebPushClient,
    signer: PartialVapidSignatureBuilder,
    subject: String,
}

impl WebPushService {
    /// Parse the VAPID private key up front; a bad key is a configuration
    /// error, not a per-delivery one.
    pub fn new(vapid: &VapidConfig) -> Result<Self, RelayError> {
        if vapid.contact.trim().is_empty() {
            return Err(RelayError::Config("VAPID contact address is empty".into()));
        }
        let signer = VapidSignatureBuilder::from_base64_no_sub(&vapid.private_key, web_push::URL_SAFE_NO_PAD)
            .map_err(|e| RelayError::Config(format!("invalid VAPID private key: {e}")))?;
        Ok(Self {
            client: HyperWebPushClient::new(),
            signer,
            subject: vapid.subject(),
        })
    }
}

#[async_trait]
impl PushService for WebPushService {
    async fn send(
        &self,
        subscription: &SubscriptionRecord,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), DeliveryError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.keys.p256dh.clone(),
            subscription.keys.auth.clone(),
        );

        let mut signature = self.signer.clone().add_sub_info(&info);
        signature.add_claim("sub", self.subject.as_str());
        let signature = signature.build().map_err(classify)?;

        let mut message = WebPushMessageBuilder::new(&info);
        message.set_payload(ContentEncoding::Aes128Gcm, payload);
        message.set_ttl(ttl.as_secs().min(u32::MAX as u64) as u32);
        message.set_vapid_signature(signature);
        let message = message.build().map_err(classify)?;

        self.client.send(message).await.map_err(classify)
    }
}

/// Map a web-push failure onto the retryability split.
fn classify(err: WebPushError) -> DeliveryError {
    let code = err.short_description();
    if is_permanent(code) {
        DeliveryError::permanent(format!("{code}: {err}"))
    } else {
        DeliveryError::transient(format!("{code}: {err}"))
    }
}

/// Codes meaning the subscription itself is unusable.
fn is_permanent(code: &str) -> bool {
    matches!(
        code,
        "endpoint_not_valid" | "endpoint_not_found" | "invalid_crypto_keys" | "missing_crypto_keys" | "invalid_uri"
    )
}
