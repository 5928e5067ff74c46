//! Subscription records and the store trait.
//!
//! Records are owned by the subscription-management API; the relay only
//! ever reads them.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::event::WorldId;

/// Browser-generated keys for payload encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub auth: String,
    pub p256dh: String,
}

/// A push endpoint and the worlds it wants alerts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub servers: BTreeSet<WorldId>,
    /// Push service URL; unique across the store.
    pub endpoint: String,
    /// Milliseconds since epoch; only some browsers provide it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    pub keys: PushKeys,
}

impl SubscriptionRecord {
    pub fn new<I, W>(endpoint: impl Into<String>, keys: PushKeys, servers: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: Into<WorldId>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            endpoint: endpoint.into(),
            expiration_time: None,
            keys,
        }
    }

    pub fn wants(&self, world: &WorldId) -> bool {
        self.servers.contains(world)
    }
}

/// Read access to the external subscription store.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; one store is shared by every
/// consumer task in the process.
#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    /// Every record whose `servers` set contains `world`, in any order.
    /// An empty vector is a valid answer.
    async fn find_by_world(&self, world: &WorldId) -> Result<Vec<SubscriptionRecord>, RelayError>;

    /// Backend identifier for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_subscription_json() {
        let json = r#"{
            "servers": ["1", "17"],
            "endpoint": "https://updates.push.services.mozilla.com/wpush/v2/abc",
            "expirationTime": null,
            "keys": { "auth": "tBHItJI5svbpez7KI4CCXg", "p256dh": "BCVxsr7N_eNgVRqvHtD0zTZsEc6-VV-JvLexhqUzORcx" }
        }"#;
        let record: SubscriptionRecord = serde_json::from_str(json).unwrap();
        assert!(record.wants(&"17".into()));
        assert!(!record.wants(&"10".into()));
        assert_eq!(record.expiration_time, None);
        assert_eq!(record.keys.auth, "tBHItJI5svbpez7KI4CCXg");
    }

    #[test]
    fn duplicate_servers_collapse() {
        let keys = PushKeys { auth: "a".into(), p256dh: "p".into() };
        let record = SubscriptionRecord::new("https://push.example/1", keys, ["1", "1", "13"]);
        assert_eq!(record.servers.len(), 2);
    }
}
