//! Error types shared across the Sluice layers.
//!
//! Plugin code reports failures as a [`BoxError`] so that any error type can
//! cross the plugin boundary. Host-side failures that the runtime reacts to
//! get their own `thiserror` enums.

use thiserror::Error;

/// A type-erased, thread-safe error returned by plugin code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a [`Worker::run`](crate::Worker::run) call.
///
/// `Ok(())` means the worker exited deliberately and will not be restarted.
pub type WorkerResult = Result<(), BoxError>;

/// Result of a [`Handler::handle`](crate::Handler::handle) call and of every
/// [`Next`](crate::Next) continuation in a chain.
pub type HandlerResult = Result<(), BoxError>;

// =============================================================================
// Load Errors
// =============================================================================

/// Errors raised while resolving a plugin's entry point and constructing it.
///
/// All variants are plugin-scoped: the affected plugin is excluded and the rest
/// of the pipeline keeps running.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Nothing could be found at the plugin's load location.
    #[error("plugin location '{location}' could not be found")]
    NotFound {
        /// The load location from the definition.
        location: String,
    },

    /// The location exists but does not expose the requested entry point.
    #[error("plugin location '{location}' does not expose entry point `{entry_point}`")]
    MissingEntryPoint {
        /// The load location from the definition.
        location: String,
        /// The entry point that was looked up.
        entry_point: String,
    },

    /// The entry point exists but constructs a different capability.
    #[error("entry point `{entry_point}` at '{location}' is not a valid {expected} constructor")]
    SignatureMismatch {
        /// The load location from the definition.
        location: String,
        /// The entry point that was looked up.
        entry_point: String,
        /// The capability the caller asked for.
        expected: &'static str,
    },

    /// The location could not be opened (native libraries only).
    #[error("failed to open plugin location '{location}': {reason}")]
    Open {
        /// The load location from the definition.
        location: String,
        /// Reason reported by the platform loader.
        reason: String,
    },

    /// The constructor ran and returned an error.
    #[error("plugin constructor failed: {0}")]
    Constructor(#[source] BoxError),
}

impl LoadError {
    /// Creates a not-found error.
    pub fn not_found(location: impl Into<String>) -> Self {
        Self::NotFound {
            location: location.into(),
        }
    }

    /// Creates a missing-entry-point error.
    pub fn missing_entry_point(location: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self::MissingEntryPoint {
            location: location.into(),
            entry_point: entry_point.into(),
        }
    }

    /// Returns `true` when the location simply does not play the requested role.
    pub fn is_missing_entry_point(&self) -> bool {
        matches!(self, Self::MissingEntryPoint { .. })
    }
}

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;
