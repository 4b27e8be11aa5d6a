//! Configuration for the Sluice runtime.
//!
//! The configuration file declares the plugins to load together with the
//! logging setup. It is read with [`figment`] and validated before use; see
//! [`ConfigLoader`] for the source layering and [`build_snapshot`] for how
//! entries become registry definitions.

mod error;
mod loader;
mod schema;
mod snapshot;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, load_config_from_file};
pub use schema::{LogFormat, LogLevel, LogOutput, LoggingConfig, PluginConfig, SluiceConfig};
pub use snapshot::build_snapshot;
pub use validation::validate_config;
