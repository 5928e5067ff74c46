//! Notification payload construction.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::event::{GameEvent, WorldId, ZoneId};
use crate::names;

/// Rendered in place of a name missing from the lookup tables.
pub const UNKNOWN_NAME: &str = "Unknown";

/// The JSON body the service worker turns into a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
}

impl NotificationPayload {
    /// Build the "alert started" notification for a world/zone pair.
    ///
    /// Deterministic; unknown ids degrade to [`UNKNOWN_NAME`].
    pub fn alert_started(world: &WorldId, zone: &ZoneId) -> Self {
        let world_name = names::world_name(world).unwrap_or(UNKNOWN_NAME);
        let zone_name = names::zone_name(zone).unwrap_or(UNKNOWN_NAME);
        Self {
            title: format!("{world_name}: Alert started!"),
            body: format!("On continent {zone_name}."),
        }
    }

    pub fn for_event(event: &GameEvent) -> Self {
        Self::alert_started(&event.world_id, &event.zone_id)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, RelayError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connery_indar() {
        let payload = NotificationPayload::alert_started(&"1".into(), &"2".into());
        assert_eq!(payload.title, "Connery: Alert started!");
        assert_eq!(payload.body, "On continent Indar.");
    }

    #[test]
    fn unknown_ids_degrade() {
        let payload = NotificationPayload::alert_started(&"999".into(), &"99".into());
        assert_eq!(payload.title, "Unknown: Alert started!");
        assert_eq!(payload.body, "On continent Unknown.");
    }

    #[test]
    fn deterministic() {
        let a = NotificationPayload::alert_started(&"17".into(), &"6".into());
        let b = NotificationPayload::alert_started(&"17".into(), &"6".into());
        assert_eq!(a, b);
        assert_eq!(a.to_json_bytes().unwrap(), b.to_json_bytes().unwrap());
    }

    #[test]
    fn json_shape() {
        let payload = NotificationPayload::alert_started(&"13".into(), &"4".into());
        let json: serde_json::Value =
            serde_json::from_slice(&payload.to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["title"], "Cobalt: Alert started!");
        assert_eq!(json["body"], "On continent Hossin.");
    }
}
