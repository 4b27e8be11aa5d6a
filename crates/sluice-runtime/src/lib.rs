//! Sluice Runtime - configuration and orchestration for the Sluice pipeline host.
//!
//! This crate provides:
//! - Configuration loading and validation ([`config`])
//! - File-backed plugin settings with environment override ([`FileSettings`])
//! - Hot reload of the configuration file ([`ConfigWatcher`])
//! - Logging setup ([`LoggingBuilder`])
//! - Runtime orchestration ([`SluiceRuntime`])
//!
//! ```ignore
//! use sluice_runtime::SluiceRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SluiceRuntime::builder()
//!         .config_file("/etc/sluice/default.toml")
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod settings;
pub mod watch;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, PluginConfig, SluiceConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{RuntimeBuilder, SluiceRuntime, wait_for_shutdown};
pub use settings::FileSettings;
pub use watch::{ConfigWatcher, RELOAD_DEBOUNCE};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `instrument` attribute
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, trace, warn};
}
