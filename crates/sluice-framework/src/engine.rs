//! The handler execution engine.
//!
//! [`HandlerEngine`] is the single consumer of the message bus. It owns the
//! pool of loaded handlers and, for every message, builds a continuation chain
//! from the handlers active at that moment:
//!
//! ```text
//! active handlers, ascending priority:  h1   h2   h3
//! fold from the back:                   terminal
//!                                       h3 ▸ terminal
//!                                       h2 ▸ h3 ▸ terminal
//!                                       h1 ▸ h2 ▸ h3 ▸ terminal
//! ```
//!
//! The chain runs `h1` first. Each handler gets the message and a [`Next`]
//! for the rest of the chain, and sees the rest of the chain's result as the
//! return value of `next.run(..)`. A failure that reaches the top is logged
//! and the message is dropped; messages are never retried.
//!
//! Pool membership only grows (on "added" notifications). Active flags are
//! read per message, so activation changes take effect on the next dispatch.
//!
//! # Timeouts
//!
//! None. Messages are dispatched one at a time, so a handler that never
//! returns stalls every later message.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use sluice_core::{
    Continuation, DataMessage, DefinitionSource, Handler, HandlerResult, Next, PluginDefinition,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info};

use crate::bus::BusReceiver;
use crate::loader::ComponentLoader;
use crate::registry::PluginRegistry;

/// A loaded handler bound to its live definition.
pub struct HandlerWrapper {
    definition: Arc<PluginDefinition>,
    handler: Arc<dyn Handler>,
}

impl HandlerWrapper {
    /// Binds `handler` to `definition`.
    pub fn new(definition: Arc<PluginDefinition>, handler: Arc<dyn Handler>) -> Self {
        Self {
            definition,
            handler,
        }
    }

    /// The definition this handler was loaded from.
    pub fn definition(&self) -> &Arc<PluginDefinition> {
        &self.definition
    }
}

impl fmt::Debug for HandlerWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerWrapper")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Runs every message through the chain of active handlers.
pub struct HandlerEngine {
    registry: Arc<PluginRegistry>,
    loader: Arc<dyn ComponentLoader>,
    pool: RwLock<Vec<Arc<HandlerWrapper>>>,
}

impl HandlerEngine {
    /// Creates an engine with an empty pool.
    pub fn new(registry: Arc<PluginRegistry>, loader: Arc<dyn ComponentLoader>) -> Self {
        Self {
            registry,
            loader,
            pool: RwLock::new(Vec::new()),
        }
    }

    // ─── Pool ────────────────────────────────────────────────────────────────

    /// Loads every handler in the live snapshot into the pool.
    ///
    /// Inactive definitions are loaded as well; they just do not take part in
    /// dispatch until activated. Returns the pool size.
    pub fn load_pool(&self) -> usize {
        for definition in self.registry.definitions() {
            self.add(&definition);
        }
        let count = self.pool_len();
        info!(count, "Handler implementations loaded");
        count
    }

    /// Loads `definition` as a handler and adds it to the pool.
    ///
    /// Returns `false` if the definition does not yield a handler.
    pub fn add(&self, definition: &Arc<PluginDefinition>) -> bool {
        let registry: Arc<dyn DefinitionSource> = self.registry.clone();
        match self.loader.load_handler(definition, registry) {
            Ok(handler) => {
                self.insert(HandlerWrapper::new(Arc::clone(definition), handler));
                true
            }
            Err(_) => false,
        }
    }

    /// Adds an already loaded handler to the pool.
    pub fn insert(&self, wrapper: HandlerWrapper) {
        self.pool.write().push(Arc::new(wrapper));
    }

    /// Subscribes to the registry so definitions added later join the pool.
    pub fn attach(self: &Arc<Self>) {
        let engine = Arc::downgrade(self);
        self.registry.on_added(move |definition| {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if engine.add(definition) {
                info!(plugin = %definition, total = engine.pool_len(), "Handler added");
            }
        });
    }

    /// Number of loaded handlers, active or not.
    pub fn pool_len(&self) -> usize {
        self.pool.read().len()
    }

    /// Handlers active right now, in ascending priority order.
    pub fn active_handlers(&self) -> Vec<Arc<HandlerWrapper>> {
        let mut active: Vec<Arc<HandlerWrapper>> = self
            .pool
            .read()
            .iter()
            .filter(|w| {
                let active = w.definition.is_active();
                if !active {
                    debug!(plugin = %w.definition, "Handler is inactive, skipping");
                }
                active
            })
            .cloned()
            .collect();
        active.sort_by_key(|w| w.definition.priority());
        active
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Runs `message` through the chain of currently active handlers.
    ///
    /// The chain's result is logged and returned; the engine itself does
    /// nothing further with a failed or stopped message.
    pub async fn dispatch(&self, message: DataMessage) -> HandlerResult {
        let span = debug_span!("dispatch", message_id = %message.id(), origin = %message.origin());
        debug!(parent: &span, "Processing message");

        let handlers = self.active_handlers();
        let chain = build_chain(&handlers, &message);

        let result = chain(message.into_payload()).instrument(span.clone()).await;
        if let Err(e) = &result {
            error!(parent: &span, error = %e, "Message processing failed");
        }
        result
    }

    /// Consumes the bus until it closes or `shutdown` is cancelled.
    ///
    /// Messages are dispatched one at a time, in arrival order.
    pub async fn run(self: Arc<Self>, mut bus: BusReceiver, shutdown: CancellationToken) {
        info!("Handler engine started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Handler engine shutting down");
                    break;
                }
                message = bus.recv() => match message {
                    Some(message) => {
                        let _ = self.dispatch(message).await;
                    }
                    None => {
                        info!("Message bus closed, handler engine stopping");
                        break;
                    }
                },
            }
        }
    }
}

impl fmt::Debug for HandlerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEngine")
            .field("pool", &*self.pool.read())
            .finish_non_exhaustive()
    }
}

/// Folds `handlers` (ascending priority) into one continuation.
fn build_chain(handlers: &[Arc<HandlerWrapper>], message: &DataMessage) -> Continuation {
    let started_at = Instant::now();
    let count = handlers.len();
    let id: Arc<str> = message.id().into();

    let terminal: Continuation = Arc::new(move |_payload: Vec<u8>| -> BoxFuture<'static, HandlerResult> {
        debug!(
            message_id = %id,
            handlers = count,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Message processed"
        );
        Box::pin(async { HandlerResult::Ok(()) })
    });

    // Only id and origin are carried forward; payloads come from the chain.
    let template = message.with_payload(Vec::new());
    handlers.iter().rev().fold(terminal, |next, wrapper| {
        let wrapper = Arc::clone(wrapper);
        let template = template.clone();
        Arc::new(move |payload: Vec<u8>| -> BoxFuture<'static, HandlerResult> {
            let wrapper = Arc::clone(&wrapper);
            let message = template.with_payload(payload);
            let next = Next::new(Arc::clone(&next));
            Box::pin(async move {
                debug!(
                    plugin = %wrapper.definition,
                    message_id = %message.id(),
                    "Handler receiving message"
                );
                wrapper.handler.handle(message, next).await
            })
        })
    })
}
