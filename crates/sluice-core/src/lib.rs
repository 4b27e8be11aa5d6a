//! # Sluice Core
//!
//! Foundation types shared by every layer of the Sluice pipeline host.
//!
//! This crate provides:
//! - **Messages**: the immutable-identity [`DataMessage`] that travels the bus
//! - **Definitions**: [`PluginDefinition`] and its derived [`PluginDefinitionStatus`]
//! - **Plugin contracts**: the [`Worker`] and [`Handler`] capabilities, together
//!   with the [`Emitter`] and [`Next`] callbacks handed to them
//! - **Settings**: the [`PluginSettings`] lookup interface
//! - **Entry points**: the constructor shapes a component loader resolves
//!
//! ## Data flow
//!
//! ```text
//! ┌──────────┐ emit  ┌─────────────┐       ┌────────────────┐
//! │  Worker  │──────▶│ Message bus │──────▶│ Handler engine │──▶ handler 1 ─▶ handler 2 ─▶ …
//! │ (task)   │       │   (mpsc)    │       │  (one task)    │
//! └──────────┘       └─────────────┘       └────────────────┘
//! ```
//!
//! Everything with moving parts (the registry, the supervisor and the engine)
//! lives in `sluice-framework`; this crate only carries the vocabulary.

pub mod definition;
pub mod error;
pub mod message;
pub mod plugin;
pub mod settings;

pub use definition::{DefinitionSource, PluginDefinition, PluginDefinitionStatus};
pub use error::{BoxError, HandlerResult, LoadError, LoadResult, WorkerResult};
pub use message::DataMessage;
pub use plugin::{
    Continuation, Emitter, EntryPoint, HANDLER_ENTRY_POINT, Handler, HandlerConstructor, Next,
    WORKER_ENTRY_POINT, Worker, WorkerConstructor,
};
pub use settings::{EmptySettings, MapSettings, PluginSettings};

/// Prelude for plugin authors.
pub mod prelude {
    pub use super::{
        BoxError, DataMessage, DefinitionSource, Emitter, Handler, HandlerResult, Next,
        PluginSettings, Worker, WorkerResult,
    };
    pub use async_trait::async_trait;
}
