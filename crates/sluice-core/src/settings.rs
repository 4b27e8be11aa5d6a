//! Per-plugin settings lookup.
//!
//! Settings are opaque to the host: a plugin receives an
//! `Arc<dyn PluginSettings>` in its constructor and looks up whatever keys it
//! understands. The file-backed implementation with environment override lives
//! in `sluice-runtime`.

use std::collections::HashMap;

use serde_json::Value;

/// Key/value lookup handed to plugin constructors.
pub trait PluginSettings: Send + Sync {
    /// Looks up `key`, returning `None` when it is not set.
    fn get(&self, key: &str) -> Option<Value>;

    /// Looks up `key` and returns it only if it is a string.
    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Settings with no keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySettings;

impl PluginSettings for EmptySettings {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }
}

/// In-memory settings, mostly for programmatic definitions and tests.
#[derive(Debug, Clone, Default)]
pub struct MapSettings {
    values: HashMap<String, Value>,
}

impl MapSettings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key (builder pattern).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl From<HashMap<String, Value>> for MapSettings {
    fn from(values: HashMap<String, Value>) -> Self {
        Self { values }
    }
}

impl PluginSettings for MapSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_settings_lookup() {
        let settings = MapSettings::new().with("url", "amqp://localhost").with("retries", 3);

        assert_eq!(settings.get_str("url").as_deref(), Some("amqp://localhost"));
        assert_eq!(settings.get("retries"), Some(Value::from(3)));
        assert_eq!(settings.get_str("retries"), None);
        assert_eq!(settings.get("missing"), None);
    }
}
