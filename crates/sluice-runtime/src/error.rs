//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while starting or running the pipeline host.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configuration file watcher could not be set up.
    #[error("Failed to watch configuration file: {0}")]
    Watch(#[from] notify::Error),

    /// `start` was called on a runtime that is already running.
    #[error("Runtime is already running")]
    AlreadyRunning,

    /// `start` was called after `stop`; worker tasks from the first run are
    /// still alive.
    #[error("Runtime has been stopped and cannot be restarted")]
    Stopped,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
