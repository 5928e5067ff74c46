//! Census event streaming wire format.
//!
//! Only the parts the relay uses: the subscribe request and classification
//! of inbound messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use alertrelay_core::error::RelayError;
use alertrelay_core::event::{GameEvent, WorldId};
use alertrelay_core::names;

pub const DEFAULT_ENDPOINT: &str = "wss://push.planetside2.com/streaming";
pub const METAGAME_EVENT: &str = "MetagameEvent";

/// Connection and subscription settings for the Census stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CensusConfig {
    /// Streaming endpoint (without query string).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Census environment, e.g. `ps2` (PC).
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Service id issued by Daybreak, without the `s:` prefix.
    pub service_id: String,
    /// Worlds to subscribe to.
    #[serde(default = "names::default_worlds")]
    pub worlds: Vec<WorldId>,
    /// Event names to subscribe to.
    #[serde(default = "default_event_names")]
    pub event_names: Vec<String>,
    /// Reconnect backoff starting duration.
    #[serde(default = "default_reconnect_initial", with = "millis")]
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    #[serde(default = "default_reconnect_max", with = "millis")]
    pub reconnect_max: Duration,
    /// How many recent event keys to remember for duplicate detection.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

fn default_endpoint() -> String { DEFAULT_ENDPOINT.into() }
fn default_environment() -> String { "ps2".into() }
fn default_event_names() -> Vec<String> { vec![METAGAME_EVENT.into()] }
fn default_reconnect_initial() -> Duration { Duration::from_millis(500) }
fn default_reconnect_max() -> Duration { Duration::from_secs(60) }
fn default_dedup_window() -> usize { 512 }

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl CensusConfig {
    /// Config for the given service id with every other field defaulted.
    pub fn for_service(service_id: impl Into<String>) -> Self {
        Self {
            endpoint: default_endpoint(),
            environment: default_environment(),
            service_id: service_id.into(),
            worlds: names::default_worlds(),
            event_names: default_event_names(),
            reconnect_initial: default_reconnect_initial(),
            reconnect_max: default_reconnect_max(),
            dedup_window: default_dedup_window(),
        }
    }

    /// Full streaming URL including environment and service id.
    pub fn stream_url(&self) -> Result<Url, RelayError> {
        if self.service_id.trim().is_empty() {
            return Err(RelayError::Config("Census service id is empty".into()));
        }
        let service = if self.service_id.starts_with("s:") {
            self.service_id.clone()
        } else {
            format!("s:{}", self.service_id)
        };
        Url::parse_with_params(
            &self.endpoint,
            &[("environment", self.environment.as_str()), ("service-id", service.as_str())],
        )
        .map_err(|e| RelayError::Config(format!("invalid Census endpoint '{}': {e}", self.endpoint)))
    }

    /// The subscribe request; sent on every connect and every resubscribe.
    pub fn subscribe_message(&self) -> Value {
        json!({
            "service": "event",
            "action": "subscribe",
            "worlds": self.worlds,
            "characters": ["all"],
            "eventNames": self.event_names,
            "logicalAndCharactersWithWorlds": true,
        })
    }
}

/// An inbound Census message, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum CensusMessage {
    /// `connectionStateChanged` from the push service.
    ConnectionState { connected: bool },
    /// An upstream world feed went on/offline.
    ServiceState { detail: String, online: bool },
    Heartbeat,
    /// Acknowledgement of a subscribe request.
    Subscribed { worlds: usize },
    /// The greeting sent right after connect.
    Help,
    /// A `serviceMessage` carrying a decodable event.
    Event(GameEvent),
    /// Valid JSON we do not understand, or an event that fails to decode.
    Unrecognised(String),
    /// Not JSON at all.
    Malformed(String),
}

/// Classify one text frame.
pub fn classify(text: &str) -> CensusMessage {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        return CensusMessage::Malformed(truncate(text));
    };

    if let Some(sub) = val.get("subscription") {
        let worlds = sub
            .get("worlds")
            .and_then(|w| w.as_array())
            .map(|w| w.len())
            .unwrap_or(0);
        return CensusMessage::Subscribed { worlds };
    }
    if val.get("send this for help").is_some() {
        return CensusMessage::Help;
    }

    match val.get("type").and_then(|t| t.as_str()) {
        Some("connectionStateChanged") => CensusMessage::ConnectionState {
            connected: truthy(val.get("connected")),
        },
        Some("serviceStateChanged") => CensusMessage::ServiceState {
            detail: val
                .get("detail")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string(),
            online: truthy(val.get("online")),
        },
        Some("heartbeat") => CensusMessage::Heartbeat,
        Some("serviceMessage") => match val.get("payload") {
            Some(payload) => match GameEvent::from_raw(payload.clone()) {
                Ok(event) => CensusMessage::Event(event),
                Err(e) => CensusMessage::Unrecognised(format!("{e}: {}", truncate(text))),
            },
            None => CensusMessage::Unrecognised(truncate(text)),
        },
        _ => CensusMessage::Unrecognised(truncate(text)),
    }
}

/// Census sends booleans as `"true"` / `"false"` strings.
fn truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(200).collect()
}
