//! Component loading: turning a plugin definition into a live worker or handler.
//!
//! A [`ComponentLoader`] resolves a named entry point at a plugin's load
//! location. The provided [`load_worker`](ComponentLoader::load_worker) and
//! [`load_handler`](ComponentLoader::load_handler) methods check that the entry
//! point constructs the requested capability and run the constructor.
//!
//! Every failure here is plugin-scoped: the caller skips the plugin and carries
//! on. A missing entry point is the normal case for a plugin that only plays
//! the other role and is logged at debug level.
//!
//! Loaders shipped with this crate:
//!
//! | Loader            | Resolves from                                            |
//! |-------------------|----------------------------------------------------------|
//! | [`StaticLoader`]  | exports linked into the binary via [`export_plugin!`](crate::export_plugin) |
//! | `NativeLoader`    | shared libraries (feature `native-plugins`)              |
//! | [`LoaderChain`]   | a list of loaders, first success wins                    |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use linkme::distributed_slice;
use sluice_core::{
    BoxError, DefinitionSource, EntryPoint, HANDLER_ENTRY_POINT, Handler, LoadError, LoadResult,
    PluginDefinition, PluginSettings, WORKER_ENTRY_POINT, Worker,
};
use tracing::{debug, error, info};

// =============================================================================
// ComponentLoader
// =============================================================================

/// Resolves plugin entry points.
pub trait ComponentLoader: Send + Sync {
    /// Resolves `entry_point` at `location`.
    fn resolve(&self, location: &str, entry_point: &str) -> LoadResult<EntryPoint>;

    /// Resolves and constructs `definition` as a [`Worker`].
    fn load_worker(
        &self,
        definition: &PluginDefinition,
        registry: Arc<dyn DefinitionSource>,
    ) -> LoadResult<Arc<dyn Worker>> {
        let result = self
            .resolve(definition.location(), WORKER_ENTRY_POINT)
            .and_then(|entry| match entry {
                EntryPoint::Worker(construct) => {
                    construct(registry, definition.settings()).map_err(LoadError::Constructor)
                }
                other => Err(mismatch(definition, WORKER_ENTRY_POINT, &other, "Worker")),
            });
        log_outcome(definition, "Worker", &result);
        result
    }

    /// Resolves and constructs `definition` as a [`Handler`].
    fn load_handler(
        &self,
        definition: &PluginDefinition,
        registry: Arc<dyn DefinitionSource>,
    ) -> LoadResult<Arc<dyn Handler>> {
        let result = self
            .resolve(definition.location(), HANDLER_ENTRY_POINT)
            .and_then(|entry| match entry {
                EntryPoint::Handler(construct) => {
                    construct(registry, definition.settings()).map_err(LoadError::Constructor)
                }
                other => Err(mismatch(definition, HANDLER_ENTRY_POINT, &other, "Handler")),
            });
        log_outcome(definition, "Handler", &result);
        result
    }
}

fn mismatch(
    definition: &PluginDefinition,
    entry_point: &str,
    found: &EntryPoint,
    expected: &'static str,
) -> LoadError {
    debug!(
        plugin = %definition,
        entry_point,
        found = found.kind(),
        "Entry point constructs the wrong capability"
    );
    LoadError::SignatureMismatch {
        location: definition.location().to_string(),
        entry_point: entry_point.to_string(),
        expected,
    }
}

fn log_outcome<T>(definition: &PluginDefinition, role: &str, result: &LoadResult<T>) {
    match result {
        Ok(_) => info!(plugin = %definition, role, "Plugin loaded"),
        Err(e) if e.is_missing_entry_point() => {
            debug!(plugin = %definition, role, "Plugin does not provide this role, skipping")
        }
        Err(e) => error!(
            plugin = %definition,
            role,
            error = %e,
            "Plugin could not be loaded, excluding it"
        ),
    }
}

// =============================================================================
// Linked exports
// =============================================================================

/// A plugin entry point compiled into the binary.
///
/// Created by [`export_plugin!`](crate::export_plugin); collected at link time.
pub struct PluginExport {
    /// Load location the export answers to.
    pub location: &'static str,
    /// Entry point name ([`WORKER_ENTRY_POINT`] or [`HANDLER_ENTRY_POINT`]).
    pub entry_point: &'static str,
    /// Builds the typed entry point.
    pub resolve: fn() -> EntryPoint,
}

/// Every plugin export linked into the current binary.
#[distributed_slice]
pub static PLUGIN_EXPORTS: [PluginExport];

/// Exports a constructor function so [`StaticLoader`] can find it.
///
/// ```rust,ignore
/// fn ticker(_: Arc<dyn DefinitionSource>, _: Arc<dyn PluginSettings>)
///     -> Result<Arc<dyn Worker>, BoxError> { Ok(Arc::new(Ticker)) }
///
/// sluice_framework::export_plugin!(worker "builtin://ticker" => ticker);
/// ```
#[macro_export]
macro_rules! export_plugin {
    (worker $location:literal => $construct:path) => {
        $crate::export_plugin!(@export $location, $crate::__core::WORKER_ENTRY_POINT, worker, $construct);
    };
    (handler $location:literal => $construct:path) => {
        $crate::export_plugin!(@export $location, $crate::__core::HANDLER_ENTRY_POINT, handler, $construct);
    };
    (@export $location:literal, $entry_point:expr, $role:ident, $construct:path) => {
        const _: () = {
            #[$crate::__linkme::distributed_slice($crate::loader::PLUGIN_EXPORTS)]
            #[linkme(crate = $crate::__linkme)]
            static EXPORT: $crate::loader::PluginExport = $crate::loader::PluginExport {
                location: $location,
                entry_point: $entry_point,
                resolve: || $crate::__core::EntryPoint::$role($construct),
            };
        };
    };
}

// =============================================================================
// StaticLoader
// =============================================================================

/// Resolves entry points linked into the binary or registered in code.
///
/// Programmatic registrations take precedence over linked exports with the
/// same location and entry point.
#[derive(Clone)]
pub struct StaticLoader {
    exports: HashMap<(String, &'static str), EntryPoint>,
    linked: bool,
}

impl StaticLoader {
    /// Creates a loader that sees every linked export.
    pub fn new() -> Self {
        Self {
            exports: HashMap::new(),
            linked: true,
        }
    }

    /// Creates a loader that only sees programmatic registrations.
    pub fn isolated() -> Self {
        Self {
            exports: HashMap::new(),
            linked: false,
        }
    }

    /// Registers a worker constructor at `location` (builder pattern).
    pub fn with_worker<F>(mut self, location: impl Into<String>, construct: F) -> Self
    where
        F: Fn(Arc<dyn DefinitionSource>, Arc<dyn PluginSettings>) -> Result<Arc<dyn Worker>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.exports.insert(
            (location.into(), WORKER_ENTRY_POINT),
            EntryPoint::worker(construct),
        );
        self
    }

    /// Registers a handler constructor at `location` (builder pattern).
    pub fn with_handler<F>(mut self, location: impl Into<String>, construct: F) -> Self
    where
        F: Fn(Arc<dyn DefinitionSource>, Arc<dyn PluginSettings>) -> Result<Arc<dyn Handler>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.exports.insert(
            (location.into(), HANDLER_ENTRY_POINT),
            EntryPoint::handler(construct),
        );
        self
    }

    fn linked_exports(&self) -> &'static [PluginExport] {
        if self.linked {
            PLUGIN_EXPORTS.static_slice()
        } else {
            &[]
        }
    }

    fn knows_location(&self, location: &str) -> bool {
        self.exports.keys().any(|(l, _)| l == location)
            || self.linked_exports().iter().any(|e| e.location == location)
    }
}

impl Default for StaticLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentLoader for StaticLoader {
    fn resolve(&self, location: &str, entry_point: &str) -> LoadResult<EntryPoint> {
        if let Some(entry) = self
            .exports
            .iter()
            .find(|((l, e), _)| l == location && *e == entry_point)
            .map(|(_, entry)| entry.clone())
        {
            return Ok(entry);
        }

        if let Some(export) = self
            .linked_exports()
            .iter()
            .find(|e| e.location == location && e.entry_point == entry_point)
        {
            return Ok((export.resolve)());
        }

        if self.knows_location(location) {
            Err(LoadError::missing_entry_point(location, entry_point))
        } else {
            Err(LoadError::not_found(location))
        }
    }
}

impl fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLoader")
            .field("registered", &self.exports.len())
            .field("linked", &self.linked_exports().len())
            .finish()
    }
}

// =============================================================================
// LoaderChain
// =============================================================================

/// Tries several loaders in order.
///
/// The first successful resolution wins. If every loader fails, the most
/// specific error is returned: a missing entry point or signature problem
/// beats "not found".
#[derive(Default, Clone)]
pub struct LoaderChain {
    loaders: Vec<Arc<dyn ComponentLoader>>,
}

impl LoaderChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a loader (builder pattern).
    pub fn with(mut self, loader: impl ComponentLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    /// Number of loaders in the chain.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Returns `true` if the chain has no loaders.
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl ComponentLoader for LoaderChain {
    fn resolve(&self, location: &str, entry_point: &str) -> LoadResult<EntryPoint> {
        let mut last = None;
        for loader in &self.loaders {
            match loader.resolve(location, entry_point) {
                Ok(entry) => return Ok(entry),
                Err(LoadError::NotFound { .. }) if last.is_some() => {}
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| LoadError::not_found(location)))
    }
}

// =============================================================================
// NativeLoader
// =============================================================================

#[cfg(feature = "native-plugins")]
pub use native::{NativeEntryFn, NativeLoader};

#[cfg(feature = "native-plugins")]
mod native {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    use libloading::{Library, Symbol};
    use parking_lot::Mutex;
    use sluice_core::{EntryPoint, LoadError, LoadResult};
    use tracing::debug;

    use super::ComponentLoader;

    /// Signature of an entry point symbol exported by a plugin library.
    ///
    /// Plugins export it as `#[unsafe(no_mangle)] pub fn sluice_worker() -> EntryPoint`
    /// (or `sluice_handler`). The library must be built with the same compiler
    /// and the same `sluice-core` version as the host.
    pub type NativeEntryFn = unsafe fn() -> EntryPoint;

    /// Loads plugins from shared libraries.
    ///
    /// Opened libraries are kept for the lifetime of the loader: constructors
    /// and the objects they return point into library code.
    #[derive(Default)]
    pub struct NativeLoader {
        libraries: Mutex<HashMap<String, Arc<Library>>>,
    }

    impl NativeLoader {
        /// Creates a loader with no libraries opened yet.
        pub fn new() -> Self {
            Self::default()
        }

        fn open(&self, location: &str) -> LoadResult<Arc<Library>> {
            let mut libraries = self.libraries.lock();
            if let Some(lib) = libraries.get(location) {
                return Ok(Arc::clone(lib));
            }
            if !Path::new(location).exists() {
                return Err(LoadError::not_found(location));
            }

            // SAFETY: Loading a plugin library runs its initializers; plugins are trusted by configuration.
            let lib = unsafe { Library::new(location) }.map_err(|e| LoadError::Open {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
            debug!(location, "Opened plugin library");

            let lib = Arc::new(lib);
            libraries.insert(location.to_string(), Arc::clone(&lib));
            Ok(lib)
        }
    }

    impl ComponentLoader for NativeLoader {
        fn resolve(&self, location: &str, entry_point: &str) -> LoadResult<EntryPoint> {
            let lib = self.open(location)?;

            // SAFETY: Symbol type matches the NativeEntryFn contract documented above.
            let entry: Symbol<NativeEntryFn> = unsafe { lib.get(entry_point.as_bytes()) }
                .map_err(|_| LoadError::missing_entry_point(location, entry_point))?;

            // SAFETY: The library stays loaded in `self.libraries` while the entry point is used.
            Ok(unsafe { entry() })
        }
    }

    impl std::fmt::Debug for NativeLoader {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("NativeLoader")
                .field("libraries", &self.libraries.lock().len())
                .finish()
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sluice_core::{Emitter, MapSettings, WorkerResult};

    struct Idle;

    #[async_trait]
    impl Worker for Idle {
        async fn run(&self, _emit: Emitter) -> WorkerResult {
            Ok(())
        }
    }

    fn idle(
        _: Arc<dyn DefinitionSource>,
        _: Arc<dyn PluginSettings>,
    ) -> Result<Arc<dyn Worker>, BoxError> {
        Ok(Arc::new(Idle))
    }

    crate::export_plugin!(worker "linked://idle" => idle);

    fn registry() -> Arc<dyn DefinitionSource> {
        Arc::new(crate::PluginRegistry::new())
    }

    #[test]
    fn test_linked_export_resolves() {
        let loader = StaticLoader::new();
        let def = PluginDefinition::new("idle", "linked://idle", "1");

        assert!(loader.load_worker(&def, registry()).is_ok());
        assert!(
            loader
                .load_handler(&def, registry())
                .err().unwrap()
                .is_missing_entry_point()
        );
    }

    #[test]
    fn test_isolated_loader_ignores_linked_exports() {
        let err = StaticLoader::isolated()
            .resolve("linked://idle", WORKER_ENTRY_POINT)
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
    }

    #[test]
    fn test_constructor_receives_settings() {
        let loader = StaticLoader::isolated().with_worker("mem://w", |_, settings| {
            match settings.get_str("mode").as_deref() {
                Some("ok") => Ok(Arc::new(Idle) as Arc<dyn Worker>),
                _ => Err("mode must be ok".into()),
            }
        });

        let good = PluginDefinition::new("w", "mem://w", "1")
            .with_settings(Arc::new(MapSettings::new().with("mode", "ok")));
        let bad = PluginDefinition::new("w", "mem://w", "1");

        assert!(loader.load_worker(&good, registry()).is_ok());
        let err = loader.load_worker(&bad, registry()).err().unwrap();
        assert!(matches!(err, LoadError::Constructor(_)));
        assert_eq!(err.to_string(), "plugin constructor failed: mode must be ok");
    }

    #[test]
    fn test_wrong_capability_is_signature_mismatch() {
        struct Mislabelled;
        impl ComponentLoader for Mislabelled {
            fn resolve(&self, _location: &str, _entry_point: &str) -> LoadResult<EntryPoint> {
                Ok(EntryPoint::worker(idle))
            }
        }

        let def = PluginDefinition::new("m", "mem://m", "1");
        let err = Mislabelled.load_handler(&def, registry()).err().unwrap();
        assert!(matches!(
            err,
            LoadError::SignatureMismatch {
                expected: "Handler",
                ..
            }
        ));
    }

    #[test]
    fn test_chain_prefers_specific_errors() {
        let chain = LoaderChain::new()
            .with(StaticLoader::isolated().with_worker("mem://w", idle))
            .with(StaticLoader::isolated());

        assert!(chain.resolve("mem://w", WORKER_ENTRY_POINT).is_ok());
        assert!(
            chain
                .resolve("mem://w", HANDLER_ENTRY_POINT)
                .unwrap_err()
                .is_missing_entry_point()
        );
        assert!(matches!(
            chain.resolve("mem://other", WORKER_ENTRY_POINT),
            Err(LoadError::NotFound { .. })
        ));
        assert!(matches!(
            LoaderChain::new().resolve("mem://w", WORKER_ENTRY_POINT),
            Err(LoadError::NotFound { .. })
        ));
    }
}
