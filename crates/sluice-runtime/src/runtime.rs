//! Runtime orchestration.
//!
//! [`SluiceRuntime`] wires the framework pieces together from a loaded
//! configuration:
//!
//! ```text
//!   config ──▶ registry ──▶ supervisor ──▶ worker tasks ──▶ bus ──▶ engine task
//!     ▲            ▲
//!     └── watcher ─┘  (hot reload)
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sluice_runtime::SluiceRuntime;
//!
//! let runtime = SluiceRuntime::builder()
//!     .config_file("/etc/sluice/default.toml")
//!     .build()?;
//!
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sluice_framework::{
    ComponentLoader, HandlerEngine, PluginRegistry, StaticLoader, WorkerSupervisor, bus,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, SluiceConfig, build_snapshot};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::watch::ConfigWatcher;

/// The pipeline host.
///
/// Built from a [`SluiceConfig`]; plugins are loaded through a
/// [`ComponentLoader`], by default a [`StaticLoader`] over the exports linked
/// into the binary (plus shared libraries with the `native-plugins` feature).
pub struct SluiceRuntime {
    config: SluiceConfig,
    config_path: Option<PathBuf>,
    load_env: bool,
    watch: bool,
    loader: Arc<dyn ComponentLoader>,
    registry: Arc<PluginRegistry>,
    overrides: Vec<SluiceConfig>,
    lifecycle: Mutex<Lifecycle>,
}

/// Where the runtime is in its single start/stop cycle.
enum Lifecycle {
    Idle,
    Running(Pipeline),
    Stopped,
}

impl Lifecycle {
    fn pipeline(&self) -> Option<&Pipeline> {
        match self {
            Self::Running(pipeline) => Some(pipeline),
            _ => None,
        }
    }
}

/// Components alive while the runtime is started.
struct Pipeline {
    supervisor: Arc<WorkerSupervisor>,
    engine: Arc<HandlerEngine>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SluiceRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// Initializes logging from `config.logging`. The runtime has no
    /// configuration file, so nothing is watched and relative settings paths
    /// resolve against the working directory.
    pub fn from_config(config: SluiceConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            plugins = config.plugins.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config,
            config_path: None,
            load_env: true,
            watch: true,
            loader: default_loader(),
            registry: Arc::new(PluginRegistry::new()),
            overrides: Vec::new(),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Replaces the component loader (builder pattern).
    pub fn with_loader(mut self, loader: Arc<dyn ComponentLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// The configuration the runtime was built from.
    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    /// The configuration file, if the runtime was built from one.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// The live plugin registry.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Returns `true` between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().pipeline().is_some()
    }

    /// Names of the workers started so far.
    pub fn workers(&self) -> Vec<String> {
        self.lifecycle
            .lock()
            .pipeline()
            .map(|p| p.supervisor.started())
            .unwrap_or_default()
    }

    /// Number of loaded handlers, active or not.
    pub fn handler_count(&self) -> usize {
        self.lifecycle
            .lock()
            .pipeline()
            .map_or(0, |p| p.engine.pool_len())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Loads the plugins and starts the worker, engine and watcher tasks.
    ///
    /// Must be called from within a Tokio runtime. A runtime starts once:
    /// calling `start` after [`stop`](Self::stop) fails with
    /// [`RuntimeError::Stopped`].
    pub fn start(&self) -> RuntimeResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => return Err(RuntimeError::AlreadyRunning),
            Lifecycle::Stopped => return Err(RuntimeError::Stopped),
        }

        info!("Starting Sluice runtime");

        let base_dir = self.config_path.as_deref().and_then(Path::parent);
        self.registry.load(build_snapshot(&self.config, base_dir));
        info!(stats = %self.registry.stats(), "Plugin definitions loaded");

        let (sender, receiver) = bus::channel();
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let supervisor = Arc::new(WorkerSupervisor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.loader),
            sender,
        ));
        supervisor.start_all();
        supervisor.attach();

        let engine = Arc::new(HandlerEngine::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.loader),
        ));
        engine.load_pool();
        engine.attach();
        tasks.push(tokio::spawn(
            Arc::clone(&engine).run(receiver, shutdown.child_token()),
        ));

        if let Some(path) = self.config_path.as_ref().filter(|_| self.watch) {
            let mut watcher = ConfigWatcher::new(path, Arc::clone(&self.registry));
            for config in &self.overrides {
                watcher = watcher.with_overrides(config.clone());
            }
            if !self.load_env {
                watcher = watcher.without_env();
            }
            match watcher.spawn(shutdown.child_token()) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    shutdown.cancel();
                    return Err(e);
                }
            }
        }

        *lifecycle = Lifecycle::Running(Pipeline {
            supervisor,
            engine,
            shutdown,
            tasks,
        });

        info!("Runtime started");
        Ok(())
    }

    /// Stops the engine and watcher tasks.
    ///
    /// Worker tasks cannot be cancelled and keep running; their messages are
    /// dropped once the engine has stopped. The runtime cannot be started
    /// again afterwards.
    pub async fn stop(&self) -> RuntimeResult<()> {
        let pipeline = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(pipeline) => pipeline,
                previous => {
                    *lifecycle = previous;
                    warn!("Runtime is not running");
                    return Ok(());
                }
            }
        };

        info!("Stopping Sluice runtime");
        pipeline.shutdown.cancel();

        for task in pipeline.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Runtime task ended abnormally");
            }
        }

        debug!(
            workers = pipeline.supervisor.started().len(),
            "Worker tasks left running"
        );
        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start()?;
        info!("Sluice runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        shutdown.await;
        self.stop().await
    }
}

/// The loader used when none is configured.
fn default_loader() -> Arc<dyn ComponentLoader> {
    #[cfg(feature = "native-plugins")]
    {
        Arc::new(
            sluice_framework::LoaderChain::new()
                .with(StaticLoader::new())
                .with(sluice_framework::NativeLoader::new()),
        )
    }

    #[cfg(not(feature = "native-plugins"))]
    {
        Arc::new(StaticLoader::new())
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`SluiceRuntime`] backed by a configuration file.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    overrides: Vec<SluiceConfig>,
    load_env: bool,
    watch: bool,
    loader: Option<Arc<dyn ComponentLoader>>,
}

impl RuntimeBuilder {
    /// Creates a builder with no configuration file.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            overrides: Vec::new(),
            load_env: true,
            watch: true,
            loader: None,
        }
    }

    /// Sets the configuration file to load and watch.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Enables `SLUICE_*` environment overrides (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self.load_env = true;
        self
    }

    /// Disables `SLUICE_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self.load_env = false;
        self
    }

    /// Merges additional configuration programmatically.
    ///
    /// The overrides are replayed on every hot reload.
    pub fn merge(mut self, config: SluiceConfig) -> Self {
        self.config_loader = self.config_loader.merge(config.clone());
        self.overrides.push(config);
        self
    }

    /// Sets the component loader.
    pub fn loader(mut self, loader: impl ComponentLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Enables or disables hot reload of the configuration file.
    pub fn watch(mut self, enabled: bool) -> Self {
        self.watch = enabled;
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> ConfigResult<SluiceRuntime> {
        let config_path = self.config_loader.path().map(Path::to_path_buf);
        let config = self.config_loader.load()?;

        let mut runtime = SluiceRuntime::from_config(config);
        runtime.config_path = config_path;
        runtime.overrides = self.overrides;
        runtime.load_env = self.load_env;
        runtime.watch = self.watch;
        if let Some(loader) = self.loader {
            runtime.loader = loader;
        }
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use sluice_core::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Ticker;

    #[async_trait]
    impl Worker for Ticker {
        async fn run(&self, emit: Emitter) -> WorkerResult {
            emit.emit(b"tick".to_vec());
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for Counter {
        async fn handle(&self, message: DataMessage, next: Next) -> HandlerResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            next.run(message.into_payload()).await
        }
    }

    fn runtime(count: Arc<AtomicUsize>) -> SluiceRuntime {
        let config = SluiceConfig {
            plugins: vec![
                PluginConfig::new("ticker", "test://ticker", "1"),
                PluginConfig::new("counter", "test://counter", "1"),
            ],
            ..Default::default()
        };
        let loader = StaticLoader::isolated()
            .with_worker("test://ticker", |_, _| Ok(Arc::new(Ticker) as Arc<dyn Worker>))
            .with_handler("test://counter", move |_, _| {
                Ok(Arc::new(Counter(Arc::clone(&count))) as Arc<dyn Handler>)
            });
        SluiceRuntime::from_config(config).with_loader(Arc::new(loader))
    }

    #[tokio::test]
    async fn test_start_wires_pipeline() {
        let count = Arc::new(AtomicUsize::new(0));
        let runtime = runtime(Arc::clone(&count));

        runtime.start().unwrap();
        assert!(runtime.is_running());
        assert_eq!(runtime.workers(), vec!["ticker".to_string()]);
        assert_eq!(runtime.handler_count(), 1);
        assert_eq!(runtime.registry().stats().active, 2);

        for _ in 0..100 {
            if count.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let runtime = runtime(Arc::new(AtomicUsize::new(0)));

        runtime.start().unwrap();
        assert!(matches!(runtime.start(), Err(RuntimeError::AlreadyRunning)));
        runtime.stop().await.unwrap();

        // Stopping twice only warns.
        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_stop_rejected() {
        let count = Arc::new(AtomicUsize::new(0));
        let runtime = runtime(Arc::clone(&count));

        runtime.start().unwrap();
        runtime.stop().await.unwrap();

        assert!(matches!(runtime.start(), Err(RuntimeError::Stopped)));
        assert!(!runtime.is_running());
        assert!(runtime.workers().is_empty());
    }

    #[tokio::test]
    async fn test_stop_before_start_keeps_runtime_startable() {
        let runtime = runtime(Arc::new(AtomicUsize::new(0)));

        runtime.stop().await.unwrap();
        runtime.start().unwrap();
        assert!(runtime.is_running());
        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until() {
        let runtime = runtime(Arc::new(AtomicUsize::new(0)));
        runtime
            .run_until(tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(!runtime.is_running());
    }
}
