//! Plugin capability contracts.
//!
//! A plugin plays one (or both) of two roles:
//!
//! - A [`Worker`] produces payloads. It is started once in its own task and
//!   receives an [`Emitter`]; each `emit` call becomes one [`DataMessage`] on
//!   the shared bus.
//! - A [`Handler`] consumes messages. For every message it receives the
//!   message and a [`Next`] continuation. Calling `next.run(payload)` passes a
//!   (possibly transformed) payload further down the chain; not calling it stops
//!   the message; returning an error aborts the chain. Whatever the rest of the
//!   chain returns comes back as the result of `next.run`, so an earlier
//!   handler can observe and react to a downstream failure.
//!
//! Plugins are constructed through an [`EntryPoint`], which a component loader
//! resolves from the plugin's load location.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::definition::DefinitionSource;
use crate::error::{BoxError, HandlerResult, WorkerResult};
use crate::message::DataMessage;
use crate::settings::PluginSettings;

/// Entry point name resolved for the worker role.
pub const WORKER_ENTRY_POINT: &str = "sluice_worker";

/// Entry point name resolved for the handler role.
pub const HANDLER_ENTRY_POINT: &str = "sluice_handler";

// =============================================================================
// Worker
// =============================================================================

/// A producer plugin.
///
/// `run` may block for as long as it likes. Returning `Err` makes the
/// supervisor log the error and call `run` again after a fixed delay with the
/// same emitter; returning `Ok(())` is a deliberate, permanent exit.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Runs the producer, emitting payloads through `emit`.
    async fn run(&self, emit: Emitter) -> WorkerResult;
}

/// Callback handed to a worker for publishing payloads.
///
/// Every call synthesizes a new [`DataMessage`] (fresh id, origin set to the
/// worker's plugin name) and enqueues it on the unbounded bus. Cloning shares
/// the same bus.
#[derive(Clone)]
pub struct Emitter {
    origin: Arc<str>,
    bus: UnboundedSender<DataMessage>,
}

impl Emitter {
    /// Creates an emitter tagging messages with `origin`.
    pub fn new(origin: impl Into<Arc<str>>, bus: UnboundedSender<DataMessage>) -> Self {
        Self {
            origin: origin.into(),
            bus,
        }
    }

    /// The origin tag applied to emitted messages.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Enqueues `payload` as a new message.
    ///
    /// Never blocks. If the consumer side is gone the message is dropped.
    pub fn emit(&self, payload: impl Into<Vec<u8>>) {
        let message = DataMessage::new(Arc::clone(&self.origin), payload);
        if let Err(e) = self.bus.send(message) {
            trace!(
                origin = %self.origin,
                message_id = %e.0.id(),
                "Message bus closed, dropping message"
            );
        }
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("origin", &self.origin)
            .field("closed", &self.bus.is_closed())
            .finish()
    }
}

// =============================================================================
// Handler
// =============================================================================

/// A consumer plugin taking part in the per-message chain.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles `message`, optionally continuing the chain through `next`.
    async fn handle(&self, message: DataMessage, next: Next) -> HandlerResult;
}

/// One link of a built chain: takes the payload, runs the rest of the chain.
pub type Continuation = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// The remainder of a handler chain, handed to each [`Handler`].
#[derive(Clone)]
pub struct Next {
    continuation: Continuation,
}

impl Next {
    /// Wraps an existing continuation.
    pub fn new(continuation: Continuation) -> Self {
        Self { continuation }
    }

    /// Builds a continuation from an async closure.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let continuation: Continuation =
            Arc::new(move |payload: Vec<u8>| -> BoxFuture<'static, HandlerResult> {
                Box::pin(f(payload))
            });
        Self { continuation }
    }

    /// Runs the rest of the chain with `payload`, returning its outcome.
    pub async fn run(self, payload: impl Into<Vec<u8>>) -> HandlerResult {
        (self.continuation)(payload.into()).await
    }

    /// Returns the underlying continuation.
    pub fn into_continuation(self) -> Continuation {
        self.continuation
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Constructor shape for a worker: `(registry view, settings) -> Worker`.
pub type WorkerConstructor = Arc<
    dyn Fn(Arc<dyn DefinitionSource>, Arc<dyn PluginSettings>) -> Result<Arc<dyn Worker>, BoxError>
        + Send
        + Sync,
>;

/// Constructor shape for a handler: `(registry view, settings) -> Handler`.
pub type HandlerConstructor = Arc<
    dyn Fn(Arc<dyn DefinitionSource>, Arc<dyn PluginSettings>) -> Result<Arc<dyn Handler>, BoxError>
        + Send
        + Sync,
>;

/// A resolved, typed entry point.
#[derive(Clone)]
pub enum EntryPoint {
    /// Constructs a [`Worker`].
    Worker(WorkerConstructor),
    /// Constructs a [`Handler`].
    Handler(HandlerConstructor),
}

impl EntryPoint {
    /// Creates a worker entry point from a constructor function.
    pub fn worker<F>(f: F) -> Self
    where
        F: Fn(Arc<dyn DefinitionSource>, Arc<dyn PluginSettings>) -> Result<Arc<dyn Worker>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self::Worker(Arc::new(f))
    }

    /// Creates a handler entry point from a constructor function.
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(Arc<dyn DefinitionSource>, Arc<dyn PluginSettings>) -> Result<Arc<dyn Handler>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self::Handler(Arc::new(f))
    }

    /// Name of the capability this entry point constructs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Worker(_) => "Worker",
            Self::Handler(_) => "Handler",
        }
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryPoint::{}", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_emitter_tags_origin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new("clock", tx);

        emitter.emit(b"tick".to_vec());
        emitter.clone().emit("tock");

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.origin(), "clock");
        assert_eq!(first.payload(), b"tick");
        assert_eq!(second.payload(), b"tock");
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_emit_after_bus_closed_is_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        Emitter::new("clock", tx).emit("lost");
    }

    #[tokio::test]
    async fn test_next_propagates_result() {
        let ok = Next::from_fn(|payload| async move {
            assert_eq!(payload, b"data");
            Ok(())
        });
        assert!(ok.run("data").await.is_ok());

        let failing = Next::from_fn(|_| async { Err::<(), BoxError>("downstream".into()) });
        let err = failing.run(Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "downstream");
    }
}
