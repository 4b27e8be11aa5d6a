//! Configuration loader using figment.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic overrides ([`ConfigLoader::merge`])
//! 3. The configuration file (TOML)
//! 4. Environment variables (`SLUICE_*`)
//!
//! # Environment Variable Mapping
//!
//! Environment variables are mapped using the `SLUICE_` prefix with `__` as separator:
//!
//! - `SLUICE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `SLUICE_INHERIT_SETTINGS_FROM_ENV=true` → `inherit_settings_from_env = true`
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .file("/etc/sluice/default.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::{debug, info, trace};

use super::error::{ConfigError, ConfigResult};
use super::schema::SluiceConfig;
use super::validation::validate_config;

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    /// Programmatic overrides.
    figment: Figment,
    /// Whether to load environment variables.
    load_env: bool,
    /// Configuration file to load.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Returns the configured file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: SluiceConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<SluiceConfig> {
        let figment = self.build_figment()?;
        let config: SluiceConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            plugins = config.plugins.len(),
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Builds the figment instance with all sources.
    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(SluiceConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = self.config_file {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = figment.merge(Toml::file_exact(&path));
        }

        if self.load_env {
            trace!("Loading environment variables with SLUICE_ prefix");
            figment = figment.merge(Env::prefixed("SLUICE_").split("__"));
        }

        Ok(figment)
    }
}

/// Loads configuration from `path` with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<SluiceConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================
