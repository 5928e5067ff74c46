//! The relay rule.
//!
//! An event is relayed iff it reports an alert start on a recognised
//! continent. Everything else is dropped by the caller.

use std::collections::BTreeSet;

use crate::event::{GameEvent, ZoneId};
use crate::names;

/// Outcome of checking one event against the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Relay,
    /// State is not `"started"`.
    NotStarted,
    /// Started, but on a zone outside the allow-list.
    UnrecognisedZone,
}

impl std::fmt::Display for FilterVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Relay => write!(f, "relay"),
            Self::NotStarted => write!(f, "not started"),
            Self::UnrecognisedZone => write!(f, "unrecognised zone"),
        }
    }
}

/// Pure predicate over [`GameEvent`]s with a fixed zone allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    relay_zones: BTreeSet<ZoneId>,
}

impl Default for EventFilter {
    /// Indar, Hossin, Amerish and Esamir.
    fn default() -> Self {
        Self::new(names::default_zones())
    }
}

impl EventFilter {
    pub fn new<I, Z>(zones: I) -> Self
    where
        I: IntoIterator<Item = Z>,
        Z: Into<ZoneId>,
    {
        Self {
            relay_zones: zones.into_iter().map(Into::into).collect(),
        }
    }

    pub fn relay_zones(&self) -> impl Iterator<Item = &ZoneId> {
        self.relay_zones.iter()
    }

    pub fn check(&self, event: &GameEvent) -> FilterVerdict {
        if !event.is_started() {
            FilterVerdict::NotStarted
        } else if !self.relay_zones.contains(&event.zone_id) {
            FilterVerdict::UnrecognisedZone
        } else {
            FilterVerdict::Relay
        }
    }

    pub fn should_relay(&self, event: &GameEvent) -> bool {
        self.check(event) == FilterVerdict::Relay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(zone: &str, state: &str) -> GameEvent {
        GameEvent::from_raw(json!({
            "instance_id": "1",
            "world_id": "1",
            "zone_id": zone,
            "metagame_event_state_name": state,
        }))
        .unwrap()
    }

    #[test]
    fn started_in_relay_zone() {
        let filter = EventFilter::default();
        assert!(filter.should_relay(&event("2", "started")));
        assert!(filter.should_relay(&event("8", "started")));
    }

    #[test]
    fn started_outside_relay_zone() {
        let filter = EventFilter::default();
        assert_eq!(filter.check(&event("99", "started")), FilterVerdict::UnrecognisedZone);
        assert!(!filter.should_relay(&event("99", "started")));
    }

    #[test]
    fn non_started_states_never_relay() {
        let filter = EventFilter::default();
        for state in ["ended", "canceled", "restarted", "delayed", "Started", ""] {
            for zone in ["2", "4", "6", "8", "99"] {
                assert!(
                    !filter.should_relay(&event(zone, state)),
                    "state={state:?} zone={zone} relayed"
                );
            }
        }
        assert_eq!(filter.check(&event("2", "ended")), FilterVerdict::NotStarted);
    }

    #[test]
    fn custom_allow_list() {
        let filter = EventFilter::new(["344"]);
        assert!(filter.should_relay(&event("344", "started")));
        assert!(!filter.should_relay(&event("2", "started")));
        assert_eq!(filter.relay_zones().count(), 1);
    }

    #[test]
    fn empty_allow_list_relays_nothing() {
        let filter = EventFilter::new(Vec::<ZoneId>::new());
        assert!(!filter.should_relay(&event("2", "started")));
    }
}
