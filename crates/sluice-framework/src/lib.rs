//! # Sluice Framework
//!
//! The moving parts of the Sluice pipeline host.
//!
//! This layer provides:
//! - [`PluginRegistry`]: the live configuration snapshot, lifecycle listeners
//!   and the pure hot-reload [`SnapshotDiff`]
//! - [`ComponentLoader`]: entry-point resolution ([`StaticLoader`],
//!   [`LoaderChain`], and `NativeLoader` with the `native-plugins` feature)
//! - [`WorkerSupervisor`]: one task per worker, restarted after a fixed delay
//!   whenever it fails
//! - The message bus ([`bus::channel`]) connecting workers to the engine
//! - [`HandlerEngine`]: the single bus consumer that runs each message through
//!   the continuation chain of active handlers
//!
//! Wiring these together from a configuration file is the job of
//! `sluice-runtime`.

pub mod bus;
pub mod engine;
pub mod loader;
pub mod registry;
pub mod supervisor;

pub use bus::{BusReceiver, BusSender};
pub use engine::{HandlerEngine, HandlerWrapper};
#[cfg(feature = "native-plugins")]
pub use loader::NativeLoader;
pub use loader::{ComponentLoader, LoaderChain, PLUGIN_EXPORTS, PluginExport, StaticLoader};
pub use registry::{DefinitionListener, PluginRegistry, RegistryStats, SnapshotDiff};
pub use supervisor::{WORKER_RESTART_DELAY, WorkerSupervisor, spawn_worker};

#[doc(hidden)]
pub use linkme as __linkme;
#[doc(hidden)]
pub use sluice_core as __core;
