//! Upstream game events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// State name the upstream reports when an alert begins.
pub const STATE_STARTED: &str = "started";

/// Identifier of a game server (world), e.g. `"1"` for Connery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub String);

/// Identifier of a continent (zone) within a world, e.g. `"2"` for Indar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(WorldId);
string_id!(ZoneId);

/// A `MetagameEvent` state transition reported by the upstream stream.
///
/// Only the fields the relay needs are decoded; everything else stays in
/// `raw`, which is what gets queued and forwarded verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    /// Upstream instance counter, unique per world. Used for log correlation
    /// and dedup keys.
    pub instance_id: String,
    pub world_id: WorldId,
    pub zone_id: ZoneId,
    /// Free-form state, e.g. `"started"`, `"ended"`, `"canceled"`.
    pub state_name: String,
    /// The complete upstream payload.
    pub raw: Value,
}

impl GameEvent {
    /// Decode the relayed fields out of a raw upstream payload.
    ///
    /// The upstream encodes ids as strings; plain JSON numbers are accepted
    /// too.
    pub fn from_raw(raw: Value) -> Result<Self, RelayError> {
        Ok(Self {
            instance_id: id_field(&raw, "instance_id")?,
            world_id: WorldId(id_field(&raw, "world_id")?),
            zone_id: ZoneId(id_field(&raw, "zone_id")?),
            state_name: id_field(&raw, "metagame_event_state_name")?,
            raw,
        })
    }

    /// Decode a queued message body (UTF-8 JSON of the raw event).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RelayError> {
        let raw: Value = serde_json::from_slice(bytes)?;
        Self::from_raw(raw)
    }

    /// Serialize the raw payload for the queue.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RelayError> {
        Ok(serde_json::to_vec(&self.raw)?)
    }

    pub fn is_started(&self) -> bool {
        self.state_name == STATE_STARTED
    }

    /// Key identifying this state transition across redeliveries.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.world_id, self.instance_id, self.state_name)
    }
}

fn id_field(raw: &Value, field: &str) -> Result<String, RelayError> {
    match raw.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RelayError::InvalidEvent { field: field.to_string() }),
    }
}
