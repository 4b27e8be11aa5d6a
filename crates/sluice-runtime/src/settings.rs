//! File-backed plugin settings.
//!
//! Each `[[plugin]]` entry may name a TOML file holding that plugin's settings.
//! The file is read once when the snapshot is built. A missing or malformed
//! file is never fatal: the plugin gets empty settings and a warning is logged.
//!
//! With `inherit_settings_from_env = true`, a non-empty environment variable
//! named exactly like the requested key takes precedence over the file and is
//! returned as a string.

use std::collections::HashMap;
use std::path::Path;

use figment::Figment;
use figment::providers::{Format, Toml};
use serde_json::Value;
use sluice_core::PluginSettings;
use tracing::{debug, warn};

/// Settings read from a plugin's TOML file.
#[derive(Debug, Clone, Default)]
pub struct FileSettings {
    values: HashMap<String, Value>,
    env_override: bool,
}

impl FileSettings {
    /// Settings with no file behind them.
    pub fn empty(env_override: bool) -> Self {
        Self {
            values: HashMap::new(),
            env_override,
        }
    }

    /// Builds settings from an in-memory map.
    pub fn from_map(values: HashMap<String, Value>, env_override: bool) -> Self {
        Self {
            values,
            env_override,
        }
    }

    /// Reads the settings file at `path`.
    pub fn load(path: &Path, env_override: bool) -> Self {
        if !path.is_file() {
            warn!(path = %path.display(), "Settings file not found, using empty settings");
            return Self::empty(env_override);
        }

        match Figment::from(Toml::file_exact(path)).extract::<HashMap<String, Value>>() {
            Ok(values) => {
                debug!(path = %path.display(), keys = values.len(), "Loaded plugin settings");
                Self::from_map(values, env_override)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse settings file, using empty settings"
                );
                Self::empty(env_override)
            }
        }
    }

    /// Whether environment variables override file values.
    pub fn env_override(&self) -> bool {
        self.env_override
    }

    /// Number of keys read from the file.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the file provided no keys.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PluginSettings for FileSettings {
    fn get(&self, key: &str) -> Option<Value> {
        if self.env_override {
            if let Some(value) = std::env::var(key).ok().filter(|v| !v.is_empty()) {
                return Some(Value::String(value));
            }
        }
        self.values.get(key).cloned()
    }
}
