//! `SubscriptionMatcher`: who wants alerts for a given world.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use alertrelay_core::error::RelayError;
use alertrelay_core::event::WorldId;
use alertrelay_core::subscription::{SubscriptionRecord, SubscriptionStore};

/// Membership query over the subscription store.
#[derive(Clone)]
pub struct SubscriptionMatcher {
    store: Arc<dyn SubscriptionStore>,
}

impl SubscriptionMatcher {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    /// Every record whose server set contains `world`, one per endpoint.
    pub async fn find_subscribers(&self, world: &WorldId) -> Result<Vec<SubscriptionRecord>, RelayError> {
        let records = self.store.find_by_world(world).await?;
        let total = records.len();

        let mut endpoints = HashSet::with_capacity(total);
        let unique: Vec<SubscriptionRecord> = records
            .into_iter()
            .filter(|r| endpoints.insert(r.endpoint.clone()))
            .collect();

        if unique.len() != total {
            warn!(
                store = %self.store.name(),
                world_id = %world,
                returned = total,
                unique = unique.len(),
                "store returned duplicate endpoints"
            );
        }
        debug!(world_id = %world, matches = unique.len(), "matching subscriptions found");
        Ok(unique)
    }
}
