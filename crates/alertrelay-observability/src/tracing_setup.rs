//! Tracing / logging initialisation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default: a bare level ("info") or full `RUST_LOG` directives
    /// ("info,alertrelay_stream=debug").
    #[serde(default = "default_level")]
    pub level: String,
    /// Per-crate overrides: component name → level.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// JSON lines (true) or human-readable text (false).
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Directive string handed to [`EnvFilter`].
    pub fn directives(&self) -> String {
        let mut directives = self.level.trim().to_string();
        if directives.is_empty() {
            directives = default_level();
        }
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. Call once at startup; later calls are
/// ignored. Invalid directives fall back to `info`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    if result.is_ok() {
        tracing::debug!(directives = %config.directives(), json = config.json, "tracing initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_overrides_use_crate_names() {
        let mut config = LogConfig::default();
        config.components.insert("alertrelay-stream".into(), "debug".into());
        config.components.insert("sqlx".into(), "warn".into());
        assert_eq!(config.directives(), "info,alertrelay_stream=debug,sqlx=warn");
    }

    #[test]
    fn empty_level_means_info() {
        let config = LogConfig { level: "  ".into(), ..LogConfig::default() };
        assert_eq!(config.directives(), "info");
    }

    #[test]
    fn rust_log_syntax_passes_through() {
        let config = LogConfig { level: "warn,alertrelay_dispatch=trace".into(), ..LogConfig::default() };
        assert!(EnvFilter::try_new(config.directives()).is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"json":true}"#).unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
        assert!(config.components.is_empty());
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing(&LogConfig::default());
        init_tracing(&LogConfig { json: true, ..LogConfig::default() });
    }
}
