//! The live plugin registry and its hot-reload diff.
//!
//! [`PluginRegistry`] owns the configuration snapshot: an ordered list of
//! shared [`PluginDefinition`]s, sorted ascending by priority after every
//! structural change. It:
//!
//! - Hands out point-in-time read views ([`definitions`](PluginRegistry::definitions)).
//! - Inserts definitions ([`append`](PluginRegistry::append)) and flips their
//!   active flag ([`activate`](PluginRegistry::activate) /
//!   [`deactivate`](PluginRegistry::deactivate)). Definitions are never removed.
//! - Notifies listeners synchronously, in registration order, after each of
//!   those operations.
//! - Reconciles a freshly parsed snapshot against the live one through a pure
//!   [`SnapshotDiff`].
//!
//! # Re-entrancy
//!
//! Listeners run on the calling task after every lock has been released, so a
//! listener may read the registry freely. A listener must not call `append`,
//! `activate` or `deactivate` itself: the nested notifications would run
//! before the outer call has finished notifying, breaking listener ordering.
//!
//! ```text
//!                 SnapshotDiff::between(live, next)
//!                              │
//!     ┌──────────────┬─────────┴─────────┬──────────────────┐
//!     ▼              ▼                   ▼                  ▼
//!   added ──▶ append   activated ──▶ activate   removed/deactivated ──▶ deactivate
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sluice_core::definition::sort_by_priority;
use sluice_core::{DefinitionSource, PluginDefinition, PluginDefinitionStatus};
use tracing::{debug, info};

/// Callback invoked with the registry's own shared definition.
pub type DefinitionListener = Arc<dyn Fn(&Arc<PluginDefinition>) + Send + Sync>;

// =============================================================================
// SnapshotDiff
// =============================================================================

/// The changes needed to move the live snapshot to a newly parsed one.
///
/// Computed by comparing the derived [`PluginDefinitionStatus`] of every
/// `(name, version)` pair in both snapshots. Building a diff never touches a
/// registry.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDiff {
    /// Active in `next`, missing from `current`. Taken from `next`.
    pub added: Vec<Arc<PluginDefinition>>,
    /// Active in `next`, not active in `current`. Includes every added entry.
    pub activated: Vec<Arc<PluginDefinition>>,
    /// Active in `current`, missing from `next`. Taken from `current`.
    pub removed: Vec<Arc<PluginDefinition>>,
    /// Active in `current`, present but inactive in `next`. Taken from `current`.
    pub deactivated: Vec<Arc<PluginDefinition>>,
}

impl SnapshotDiff {
    /// Compares `current` against `next`.
    pub fn between(current: &[Arc<PluginDefinition>], next: &[Arc<PluginDefinition>]) -> Self {
        let mut diff = Self::default();

        for def in next {
            if PluginDefinitionStatus::of(next, def) != PluginDefinitionStatus::Active {
                continue;
            }
            match PluginDefinitionStatus::of(current, def) {
                PluginDefinitionStatus::Missing => {
                    diff.added.push(Arc::clone(def));
                    diff.activated.push(Arc::clone(def));
                }
                PluginDefinitionStatus::Inactive => diff.activated.push(Arc::clone(def)),
                PluginDefinitionStatus::Active => {}
            }
        }

        for def in current {
            if PluginDefinitionStatus::of(current, def) != PluginDefinitionStatus::Active {
                continue;
            }
            match PluginDefinitionStatus::of(next, def) {
                PluginDefinitionStatus::Missing => diff.removed.push(Arc::clone(def)),
                PluginDefinitionStatus::Inactive => diff.deactivated.push(Arc::clone(def)),
                PluginDefinitionStatus::Active => {}
            }
        }

        diff
    }

    /// Returns `true` if applying this diff would change nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.activated.is_empty()
            && self.removed.is_empty()
            && self.deactivated.is_empty()
    }
}

impl fmt::Display for SnapshotDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} activated, {} removed, {} deactivated",
            self.added.len(),
            self.activated.len(),
            self.removed.len(),
            self.deactivated.len()
        )
    }
}

// =============================================================================
// RegistryStats
// =============================================================================

/// Counts over the live snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of definitions.
    pub total: usize,
    /// Definitions with the active flag set.
    pub active: usize,
    /// Definitions with the active flag cleared.
    pub inactive: usize,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} plugins ({} active, {} inactive)",
            self.total, self.active, self.inactive
        )
    }
}

// =============================================================================
// PluginRegistry
// =============================================================================

#[derive(Default)]
struct Listeners {
    added: Vec<DefinitionListener>,
    activated: Vec<DefinitionListener>,
    deactivated: Vec<DefinitionListener>,
}

#[derive(Clone, Copy)]
enum Event {
    Added,
    Activated,
    Deactivated,
}

/// Owner of the live configuration snapshot.
#[derive(Default)]
pub struct PluginRegistry {
    snapshot: RwLock<Vec<Arc<PluginDefinition>>>,
    listeners: Mutex<Listeners>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `snapshot`, sorted by priority.
    pub fn with_snapshot(snapshot: Vec<Arc<PluginDefinition>>) -> Self {
        let registry = Self::new();
        registry.load(snapshot);
        registry
    }

    /// Replaces the live snapshot wholesale, without notifying listeners.
    ///
    /// Used for the initial load, before any consumer has subscribed.
    pub fn load(&self, mut snapshot: Vec<Arc<PluginDefinition>>) {
        sort_by_priority(&mut snapshot);
        *self.snapshot.write() = snapshot;
    }

    /// Current snapshot in priority order.
    pub fn definitions(&self) -> Vec<Arc<PluginDefinition>> {
        self.snapshot.read().clone()
    }

    /// Status of `definition`'s identity in the live snapshot.
    pub fn status(&self, definition: &PluginDefinition) -> PluginDefinitionStatus {
        PluginDefinitionStatus::of(&self.snapshot.read(), definition)
    }

    /// Looks up the live definition for `(name, version)`.
    pub fn find(&self, name: &str, version: &str) -> Option<Arc<PluginDefinition>> {
        self.snapshot
            .read()
            .iter()
            .find(|d| d.matches(name, version))
            .cloned()
    }

    /// Counts definitions by active flag.
    pub fn stats(&self) -> RegistryStats {
        let snapshot = self.snapshot.read();
        let active = snapshot.iter().filter(|d| d.is_active()).count();
        RegistryStats {
            total: snapshot.len(),
            active,
            inactive: snapshot.len() - active,
        }
    }

    // ─── Mutations ───────────────────────────────────────────────────────────

    /// Inserts `definition`, re-sorts, and notifies "added" listeners.
    pub fn append(&self, definition: Arc<PluginDefinition>) {
        {
            let mut snapshot = self.snapshot.write();
            snapshot.push(Arc::clone(&definition));
            sort_by_priority(&mut snapshot);
        }
        info!(plugin = %definition, priority = definition.priority(), "Plugin definition added");
        self.notify(Event::Added, &definition);
    }

    /// Sets the active flag of the matching live definition and notifies
    /// "activated" listeners.
    ///
    /// Listeners still fire when no live definition matches; they then receive
    /// `definition` itself.
    pub fn activate(&self, definition: &Arc<PluginDefinition>) {
        let target = self.set_active(definition, true);
        self.notify(Event::Activated, &target);
    }

    /// Clears the active flag of the matching live definition and notifies
    /// "deactivated" listeners. The definition stays in the snapshot.
    pub fn deactivate(&self, definition: &Arc<PluginDefinition>) {
        let target = self.set_active(definition, false);
        self.notify(Event::Deactivated, &target);
    }

    fn set_active(&self, definition: &Arc<PluginDefinition>, active: bool) -> Arc<PluginDefinition> {
        match self.find(definition.name(), definition.version()) {
            Some(live) => {
                live.set_active(active);
                info!(plugin = %live, active, "Plugin definition state changed");
                live
            }
            None => {
                debug!(plugin = %definition, active, "No live plugin definition to update");
                Arc::clone(definition)
            }
        }
    }

    /// Applies `diff`: added, then activated, then removed, then deactivated.
    pub fn apply(&self, diff: &SnapshotDiff) {
        for def in &diff.added {
            self.append(Arc::clone(def));
        }
        for def in &diff.activated {
            self.activate(def);
        }
        for def in diff.removed.iter().chain(&diff.deactivated) {
            self.deactivate(def);
        }
    }

    /// Reconciles the live snapshot with `next` and returns what changed.
    pub fn apply_snapshot(&self, next: &[Arc<PluginDefinition>]) -> SnapshotDiff {
        let diff = SnapshotDiff::between(&self.definitions(), next);
        if diff.is_empty() {
            debug!("Configuration reloaded without plugin changes");
        } else {
            self.apply(&diff);
            info!(changes = %diff, stats = %self.stats(), "Configuration changes applied");
        }
        diff
    }

    // ─── Listeners ───────────────────────────────────────────────────────────

    /// Registers a callback for future "added" events.
    pub fn on_added(&self, listener: impl Fn(&Arc<PluginDefinition>) + Send + Sync + 'static) {
        self.listeners.lock().added.push(Arc::new(listener));
    }

    /// Registers a callback for future "activated" events.
    pub fn on_activated(&self, listener: impl Fn(&Arc<PluginDefinition>) + Send + Sync + 'static) {
        self.listeners.lock().activated.push(Arc::new(listener));
    }

    /// Registers a callback for future "deactivated" events.
    pub fn on_deactivated(
        &self,
        listener: impl Fn(&Arc<PluginDefinition>) + Send + Sync + 'static,
    ) {
        self.listeners.lock().deactivated.push(Arc::new(listener));
    }

    fn notify(&self, event: Event, definition: &Arc<PluginDefinition>) {
        let listeners: Vec<DefinitionListener> = {
            let guard = self.listeners.lock();
            match event {
                Event::Added => guard.added.clone(),
                Event::Activated => guard.activated.clone(),
                Event::Deactivated => guard.deactivated.clone(),
            }
        };
        for listener in listeners {
            listener(definition);
        }
    }
}

impl DefinitionSource for PluginRegistry {
    fn definitions(&self) -> Vec<Arc<PluginDefinition>> {
        PluginRegistry::definitions(self)
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("definitions", &*self.snapshot.read())
            .finish_non_exhaustive()
    }
}
