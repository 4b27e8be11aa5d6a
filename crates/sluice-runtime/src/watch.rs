//! Hot reload of the configuration file.
//!
//! [`ConfigWatcher`] watches the directory holding the configuration file and
//! reacts to changes of that one file. Watching the directory rather than the
//! file keeps working when an editor replaces the file instead of writing it
//! in place.
//!
//! Each reaction re-reads the file, builds a fresh snapshot and hands it to
//! [`PluginRegistry::apply_snapshot`]. A file that fails to load is logged and
//! skipped; the live snapshot stays authoritative.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use sluice_framework::{PluginRegistry, SnapshotDiff};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, ConfigResult, SluiceConfig, build_snapshot};
use crate::error::RuntimeResult;

/// Minimum time between two reloads. Events inside the window are coalesced.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Reloads the registry whenever the configuration file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    registry: Arc<PluginRegistry>,
    overrides: Vec<SluiceConfig>,
    load_env: bool,
    debounce: Duration,
}

impl ConfigWatcher {
    /// Creates a watcher for `path` feeding `registry`.
    pub fn new(path: impl Into<PathBuf>, registry: Arc<PluginRegistry>) -> Self {
        Self {
            path: path.into(),
            registry,
            overrides: Vec::new(),
            load_env: true,
            debounce: RELOAD_DEBOUNCE,
        }
    }

    /// Sets the reload debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Replays `config` under the file on every reload, the way
    /// [`ConfigLoader::merge`] layers it at startup.
    pub fn with_overrides(mut self, config: SluiceConfig) -> Self {
        self.overrides.push(config);
        self
    }

    /// Reloads without `SLUICE_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// The watched configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file and reconciles the registry with it.
    pub fn reload(&self) -> ConfigResult<SnapshotDiff> {
        let mut loader = ConfigLoader::new();
        for config in &self.overrides {
            loader = loader.merge(config.clone());
        }
        loader = loader.file(&self.path);
        if !self.load_env {
            loader = loader.without_env();
        }
        let config = loader.load()?;
        let snapshot = build_snapshot(&config, self.path.parent());
        Ok(self.registry.apply_snapshot(&snapshot))
    }

    /// Starts watching and spawns the reload task.
    ///
    /// The watcher is registered before this returns, so changes made after
    /// the call are observed. The task ends when `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> RuntimeResult<JoinHandle<()>> {
        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %self.path.display(), "Watching configuration file");

        Ok(tokio::spawn(async move {
            // The watcher stops delivering events once dropped.
            let _watcher = watcher;
            self.watch_loop(rx, shutdown).await;
        }))
    }

    async fn watch_loop(
        &self,
        mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Configuration watcher stopping");
                    break;
                }
                event = events.recv() => match event {
                    Some(Ok(event)) if self.is_relevant(&event) => {
                        tokio::time::sleep(self.debounce).await;
                        drain_pending(&mut events);
                        self.reload_logged();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(error = %e, "Configuration watch error"),
                    None => break,
                },
            }
        }
    }

    fn reload_logged(&self) {
        info!(path = %self.path.display(), "Configuration file changed, reloading");
        if let Err(e) = self.reload() {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to reload configuration, keeping current plugins"
            );
        }
    }

    fn is_relevant(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        let Some(name) = self.path.file_name() else {
            return false;
        };
        event.paths.iter().any(|p| p.file_name() == Some(name))
    }
}

/// Discards events queued during the debounce window, logging watch errors.
/// Returns the number of errors seen.
fn drain_pending(events: &mut mpsc::UnboundedReceiver<notify::Result<Event>>) -> usize {
    let mut errors = 0;
    while let Ok(pending) = events.try_recv() {
        if let Err(e) = pending {
            warn!(error = %e, "Configuration watch error");
            errors += 1;
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;

    use notify::event::ModifyKind;
    use parking_lot::Mutex;

    use crate::config::PluginConfig;

    const INITIAL: &str = r#"
        [[plugin]]
        name = "a"
        path = "/a"
        version = "1"

        [[plugin]]
        name = "b"
        path = "/b"
        version = "1"
    "#;

    fn setup(contents: &str) -> (tempfile::TempDir, PathBuf, Arc<PluginRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sluice.toml");
        fs::write(&path, contents).unwrap();

        let config = ConfigLoader::new().file(&path).without_env().load().unwrap();
        let registry = Arc::new(PluginRegistry::with_snapshot(build_snapshot(
            &config,
            path.parent(),
        )));
        (dir, path, registry)
    }

    #[test]
    fn test_reload_applies_diff() {
        let (_dir, path, registry) = setup(INITIAL);
        let watcher = ConfigWatcher::new(&path, Arc::clone(&registry)).without_env();

        fs::write(
            &path,
            r#"
            [[plugin]]
            name = "a"
            path = "/a"
            version = "1"
            active = false

            [[plugin]]
            name = "c"
            path = "/c"
            version = "1"
            "#,
        )
        .unwrap();

        let diff = watcher.reload().unwrap();

        assert_eq!(diff.to_string(), "1 added, 1 activated, 1 removed, 1 deactivated");
        assert!(!registry.find("a", "1").unwrap().is_active());
        assert!(!registry.find("b", "1").unwrap().is_active());
        assert!(registry.find("c", "1").unwrap().is_active());
        assert_eq!(registry.stats().total, 3);
    }

    #[test]
    fn test_reload_replays_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sluice.toml");
        fs::write(&path, "inherit_settings_from_env = false\n").unwrap();

        let overrides = SluiceConfig {
            plugins: vec![PluginConfig::new("merged", "/merged", "1")],
            ..Default::default()
        };
        let config = ConfigLoader::new()
            .merge(overrides.clone())
            .file(&path)
            .without_env()
            .load()
            .unwrap();
        let registry = Arc::new(PluginRegistry::with_snapshot(build_snapshot(&config, None)));
        let watcher = ConfigWatcher::new(&path, Arc::clone(&registry))
            .with_overrides(overrides)
            .without_env();

        fs::write(&path, "# touched\ninherit_settings_from_env = false\n").unwrap();

        assert!(watcher.reload().unwrap().is_empty());
        assert!(registry.find("merged", "1").unwrap().is_active());
    }

    #[test]
    fn test_reload_failure_keeps_snapshot() {
        let (_dir, path, registry) = setup(INITIAL);
        let watcher = ConfigWatcher::new(&path, Arc::clone(&registry)).without_env();

        fs::write(&path, "[[plugin]]\nname = ").unwrap();

        assert!(watcher.reload().is_err());
        assert_eq!(registry.stats().active, 2);
    }

    #[test]
    fn test_unchanged_file_is_empty_diff() {
        let (_dir, path, registry) = setup(INITIAL);
        let watcher = ConfigWatcher::new(&path, registry);

        assert!(watcher.without_env().reload().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_change_triggers_reload() {
        let (_dir, path, registry) = setup(INITIAL);
        let shutdown = CancellationToken::new();
        let task = ConfigWatcher::new(&path, Arc::clone(&registry))
            .without_env()
            .with_debounce(Duration::from_millis(20))
            .spawn(shutdown.clone())
            .unwrap();

        let updated = format!("{INITIAL}\n[[plugin]]\nname = \"c\"\npath = \"/c\"\nversion = \"1\"\n");
        fs::write(&path, updated).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while registry.find("c", "1").is_none() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(registry.find("c", "1").is_some());

        shutdown.cancel();
        task.await.unwrap();
    }

    fn with_plugin(name: &str) -> String {
        format!("{INITIAL}\n[[plugin]]\nname = \"{name}\"\npath = \"/{name}\"\nversion = \"1\"\n")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_burst_of_writes_coalesced() {
        let (_dir, path, registry) = setup(INITIAL);

        let added = Arc::new(Mutex::new(Vec::new()));
        let deactivated = Arc::new(Mutex::new(Vec::new()));
        {
            let added = Arc::clone(&added);
            registry.on_added(move |def| added.lock().push(def.name().to_string()));
            let deactivated = Arc::clone(&deactivated);
            registry.on_deactivated(move |def| deactivated.lock().push(def.name().to_string()));
        }

        let shutdown = CancellationToken::new();
        let task = ConfigWatcher::new(&path, Arc::clone(&registry))
            .without_env()
            .spawn(shutdown.clone())
            .unwrap();

        // Every intermediate state would remove "c" again if it were applied.
        for _ in 0..3 {
            fs::write(&path, with_plugin("c")).unwrap();
            fs::write(&path, INITIAL).unwrap();
        }
        fs::write(&path, with_plugin("c")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while registry.find("c", "1").is_none() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        // Late events only reload the final file again.
        tokio::time::sleep(RELOAD_DEBOUNCE * 3).await;

        assert_eq!(*added.lock(), vec!["c".to_string()]);
        assert!(deactivated.lock().is_empty());
        assert!(registry.find("c", "1").unwrap().is_active());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reactions_spaced_by_debounce() {
        let (_dir, path, registry) = setup(INITIAL);

        let added = Arc::new(Mutex::new(Vec::new()));
        {
            let added = Arc::clone(&added);
            registry.on_added(move |def| added.lock().push((def.name().to_string(), Instant::now())));
        }

        let shutdown = CancellationToken::new();
        let task = ConfigWatcher::new(&path, Arc::clone(&registry))
            .without_env()
            .spawn(shutdown.clone())
            .unwrap();

        let wait_for = |count: usize| {
            let added = Arc::clone(&added);
            async move {
                let deadline = Instant::now() + Duration::from_secs(10);
                while added.lock().len() < count && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                added.lock().len() >= count
            }
        };

        fs::write(&path, with_plugin("c")).unwrap();
        assert!(wait_for(1).await);

        let second = format!(
            "{}\n[[plugin]]\nname = \"d\"\npath = \"/d\"\nversion = \"1\"\n",
            with_plugin("c")
        );
        fs::write(&path, second).unwrap();
        assert!(wait_for(2).await);

        {
            let added = added.lock();
            assert_eq!(added[0].0, "c");
            assert_eq!(added[1].0, "d");
            assert!(added[1].1.duration_since(added[0].1) >= RELOAD_DEBOUNCE);
        }

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_drain_logs_pending_errors() {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let modify = || Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("sluice.toml"));

        tx.send(Ok(modify())).unwrap();
        tx.send(Err(notify::Error::generic("inotify queue overflow"))).unwrap();
        tx.send(Ok(modify())).unwrap();
        tx.send(Err(notify::Error::generic("watch removed"))).unwrap();

        assert_eq!(drain_pending(&mut rx), 2);
        assert!(rx.try_recv().is_err());
    }
}
