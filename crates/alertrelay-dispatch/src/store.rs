//! In-memory subscription store.
//!
//! Keyed by endpoint, like the real store. Useful for tests and local runs
//! seeded from a JSON file; all data is lost when the process exits.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use alertrelay_core::error::RelayError;
use alertrelay_core::event::WorldId;
use alertrelay_core::subscription::{SubscriptionRecord, SubscriptionStore};

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    records: RwLock<HashMap<String, SubscriptionRecord>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON array of subscription records.
    pub fn from_json(json: &str) -> Result<Self, RelayError> {
        let records: Vec<SubscriptionRecord> = serde_json::from_str(json)?;
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        Ok(store)
    }

    /// Insert or replace the record for its endpoint.
    pub fn upsert(&self, record: SubscriptionRecord) {
        self.records
            .write()
            .unwrap()
            .insert(record.endpoint.clone(), record);
    }

    pub fn remove(&self, endpoint: &str) -> Option<SubscriptionRecord> {
        self.records.write().unwrap().remove(endpoint)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_by_world(&self, world: &WorldId) -> Result<Vec<SubscriptionRecord>, RelayError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|r| r.wants(world))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
