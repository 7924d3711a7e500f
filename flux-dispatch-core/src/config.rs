//! Dispatcher configuration
//!
//! Configuration is plain data with serde support, so applications can keep it
//! next to their own settings and load it from JSON:
//!
//! ```
//! use flux_dispatch_core::DispatcherConfig;
//!
//! let config = DispatcherConfig::from_json(r#"{
//!     "label": "player",
//!     "trace_handlers": true,
//!     "log": { "capacity": 16, "exclude": ["Tick", "Progress*"] }
//! }"#).unwrap();
//!
//! assert_eq!(config.label, "player");
//! assert_eq!(config.log.capacity, 16);
//! assert!(config.log.enabled);
//! ```

use serde::{Deserialize, Serialize};

use crate::log::LogFilter;

/// Top-level dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name attached to every tracing event emitted by the dispatcher
    pub label: String,
    /// Emit a debug event for every handler invocation
    pub trace_handlers: bool,
    /// Dispatch log settings
    pub log: LogConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            label: "dispatcher".to_string(),
            trace_handlers: false,
            log: LogConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Create a default config with a custom label
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the config to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Settings for the in-memory dispatch log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Keep an in-memory history; tracing events are emitted either way
    pub enabled: bool,
    /// Maximum number of entries kept
    pub capacity: usize,
    /// If non-empty, only actions matching one of these globs are logged
    pub include: Vec<String>,
    /// Actions matching any of these globs are skipped
    pub exclude: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        let filter = LogFilter::default();
        Self {
            enabled: true,
            capacity: 100,
            include: filter.include,
            exclude: filter.exclude,
        }
    }
}

impl LogConfig {
    /// Build the glob filter described by this config
    pub fn filter(&self) -> LogFilter {
        LogFilter::with_patterns(self.include.clone(), self.exclude.clone())
    }
}
