//! # Sluice
//!
//! A pluggable data-pipeline host.
//!
//! ## Overview
//!
//! Sluice loads plugins named in a TOML configuration file. A plugin plays one
//! or both of two roles:
//!
//! ```text
//! ┌──────────────┐ emit ┌─────┐      ┌────────┐
//! │ Worker "csv" │─────▶│     │      │        │──▶ Handler (priority 1)
//! ├──────────────┤      │ bus │─────▶│ engine │        │ next
//! │ Worker "mq"  │─────▶│     │      │        │        ▼
//! └──────────────┘      └─────┘      └────────┘    Handler (priority 2) ──▶ …
//! ```
//!
//! - **Workers** run in their own task, restarted one second after any failure
//! - **Handlers** form a chain per message, ordered by priority; each decides
//!   whether to pass a (possibly transformed) payload on
//! - **Hot reload**: edits to the configuration file add, activate and
//!   deactivate plugins without a restart
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//!
//! struct Uppercase;
//!
//! #[async_trait]
//! impl Handler for Uppercase {
//!     async fn handle(&self, message: DataMessage, next: Next) -> HandlerResult {
//!         next.run(message.payload().to_ascii_uppercase()).await
//!     }
//! }
//!
//! fn uppercase(
//!     _: Arc<dyn DefinitionSource>,
//!     _: Arc<dyn PluginSettings>,
//! ) -> Result<Arc<dyn Handler>, BoxError> {
//!     Ok(Arc::new(Uppercase))
//! }
//!
//! export_plugin!(handler "builtin://uppercase" => uppercase);
//! ```
//!
//! ## Features
//!
//! - `native-plugins` (default): load plugins from shared libraries
//! - `json-log`: JSON log output

pub use sluice_core as core;
pub use sluice_framework as framework;
pub use sluice_runtime as runtime;

pub use sluice_framework::export_plugin;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use sluice::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime
    pub use sluice_runtime::{SluiceConfig, SluiceRuntime};

    // Plugin contracts
    pub use sluice_core::prelude::*;

    // Loading
    pub use sluice_framework::{ComponentLoader, StaticLoader, export_plugin};

    // Logging macros
    pub use sluice_runtime::prelude::*;
}
