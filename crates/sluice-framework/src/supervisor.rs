//! Worker supervision.
//!
//! [`WorkerSupervisor`] loads every configured definition that provides a
//! worker and runs each one in its own task. A worker task loops:
//!
//! ```text
//!           ┌────────────────────────────────────────┐
//!           ▼                                        │
//!   worker.run(emitter) ── Err ──▶ log, sleep 1s ────┘
//!           │
//!           └──── Ok ──▶ warn, task ends (never restarted)
//! ```
//!
//! There is no backoff growth and no restart ceiling. Worker tasks are not
//! tied to the active flag of their definition: deactivating or removing a
//! worker's definition leaves its task running, and its messages keep flowing
//! onto the bus.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sluice_core::{DefinitionSource, Emitter, PluginDefinition, Worker};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::BusSender;
use crate::loader::ComponentLoader;
use crate::registry::PluginRegistry;

/// Delay between a worker failure and its restart.
pub const WORKER_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Starts and restarts worker plugins.
pub struct WorkerSupervisor {
    registry: Arc<PluginRegistry>,
    loader: Arc<dyn ComponentLoader>,
    bus: BusSender,
    started: Mutex<Vec<String>>,
}

impl WorkerSupervisor {
    /// Creates a supervisor publishing onto `bus`.
    pub fn new(
        registry: Arc<PluginRegistry>,
        loader: Arc<dyn ComponentLoader>,
        bus: BusSender,
    ) -> Self {
        Self {
            registry,
            loader,
            bus,
            started: Mutex::new(Vec::new()),
        }
    }

    /// Loads and starts every worker in the live snapshot.
    ///
    /// Definitions that do not provide a worker, or fail to load, are skipped.
    /// Returns the number of started workers.
    pub fn start_all(&self) -> usize {
        for definition in self.registry.definitions() {
            self.start(&definition);
        }
        let count = self.started.lock().len();
        info!(count, "Worker implementations loaded");
        count
    }

    /// Loads `definition` as a worker and spawns its task.
    ///
    /// Returns `None` if the definition does not yield a worker. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self, definition: &Arc<PluginDefinition>) -> Option<JoinHandle<()>> {
        let registry: Arc<dyn DefinitionSource> = self.registry.clone();
        let worker = self.loader.load_worker(definition, registry).ok()?;

        self.started.lock().push(definition.name().to_string());
        let emitter = self.bus.emitter(definition.name());
        Some(spawn_worker(definition.name(), worker, emitter))
    }

    /// Subscribes to the registry so definitions added later are started too.
    pub fn attach(self: &Arc<Self>) {
        let supervisor = Arc::downgrade(self);
        self.registry.on_added(move |definition| {
            let Some(supervisor) = supervisor.upgrade() else {
                return;
            };
            if supervisor.start(definition).is_some() {
                info!(
                    plugin = %definition,
                    total = supervisor.started.lock().len(),
                    "Worker added"
                );
            }
        });
    }

    /// Names of the workers started so far, in start order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

/// Spawns the supervision loop for one worker.
///
/// The same `emitter` is handed to every run of the worker.
pub fn spawn_worker(
    name: impl Into<String>,
    worker: Arc<dyn Worker>,
    emitter: Emitter,
) -> JoinHandle<()> {
    tokio::spawn(supervise(name.into(), worker, emitter))
}

async fn supervise(name: String, worker: Arc<dyn Worker>, emitter: Emitter) {
    loop {
        match worker.run(emitter.clone()).await {
            Ok(()) => {
                warn!(worker = %name, "Worker exited without error, it will not be restarted");
                return;
            }
            Err(e) => {
                error!(worker = %name, error = %e, "Worker failed");
                info!(
                    worker = %name,
                    delay_ms = WORKER_RESTART_DELAY.as_millis() as u64,
                    "Restarting worker"
                );
                tokio::time::sleep(WORKER_RESTART_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::loader::StaticLoader;
    use async_trait::async_trait;
    use sluice_core::{BoxError, PluginSettings, WorkerResult};
    use tokio::time::Instant;

    /// Fails `failures` times, then returns cleanly.
    struct Flaky {
        failures: usize,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Worker for Flaky {
        async fn run(&self, emit: Emitter) -> WorkerResult {
            let call = {
                let mut calls = self.calls.lock();
                calls.push(Instant::now());
                calls.len()
            };
            emit.emit(format!("run {call}"));
            if call <= self.failures {
                Err(format!("failure {call}").into())
            } else {
                Ok(())
            }
        }
    }

    struct Once;

    #[async_trait]
    impl Worker for Once {
        async fn run(&self, emit: Emitter) -> WorkerResult {
            emit.emit("hello");
            Ok(())
        }
    }

    fn once(
        _: Arc<dyn DefinitionSource>,
        _: Arc<dyn PluginSettings>,
    ) -> Result<Arc<dyn Worker>, BoxError> {
        Ok(Arc::new(Once))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_worker_restarts_after_fixed_delay() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let worker = Arc::new(Flaky {
            failures: 3,
            calls: Arc::clone(&calls),
        });
        let (tx, mut rx) = bus::channel();

        spawn_worker("flaky", worker, tx.emitter("flaky"))
            .await
            .unwrap();

        let calls = calls.lock().clone();
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= WORKER_RESTART_DELAY, "gap {gap:?} shorter than delay");
            assert!(gap < WORKER_RESTART_DELAY + Duration::from_millis(100));
        }

        let mut payloads = Vec::new();
        while let Some(message) = rx.try_recv() {
            assert_eq!(message.origin(), "flaky");
            payloads.push(String::from_utf8(message.into_payload()).unwrap());
        }
        assert_eq!(payloads, vec!["run 1", "run 2", "run 3", "run 4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_exit_is_not_restarted() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let worker = Arc::new(Flaky {
            failures: 0,
            calls: Arc::clone(&calls),
        });
        let (tx, _rx) = bus::channel();

        let handle = spawn_worker("steady", worker, tx.emitter("steady"));
        tokio::time::sleep(WORKER_RESTART_DELAY * 5).await;

        assert!(handle.is_finished());
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_start_all_skips_non_workers() {
        let registry = Arc::new(PluginRegistry::with_snapshot(vec![
            Arc::new(PluginDefinition::new("producer", "mem://producer", "1")),
            Arc::new(PluginDefinition::new("consumer", "mem://consumer", "1")),
            Arc::new(PluginDefinition::new("absent", "mem://absent", "1")),
        ]));
        let loader = StaticLoader::isolated()
            .with_worker("mem://producer", once)
            .with_handler("mem://consumer", |_, _| Err("not used".into()));
        let (tx, mut rx) = bus::channel();

        let supervisor = WorkerSupervisor::new(registry, Arc::new(loader), tx);

        assert_eq!(supervisor.start_all(), 1);
        assert_eq!(supervisor.started(), vec!["producer"]);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.origin(), "producer");
        assert_eq!(message.payload(), b"hello");
    }

    #[tokio::test]
    async fn test_added_definition_is_started() {
        let registry = Arc::new(PluginRegistry::new());
        let loader = StaticLoader::isolated().with_worker("mem://late", once);
        let (tx, mut rx) = bus::channel();

        let supervisor = Arc::new(WorkerSupervisor::new(
            Arc::clone(&registry),
            Arc::new(loader),
            tx,
        ));
        supervisor.attach();
        assert_eq!(supervisor.start_all(), 0);

        registry.append(Arc::new(PluginDefinition::new("late", "mem://late", "1")));

        assert_eq!(supervisor.started(), vec!["late"]);
        assert_eq!(rx.recv().await.unwrap().origin(), "late");
    }
}
