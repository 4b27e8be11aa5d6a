//! Plugin definitions and their derived status.
//!
//! A [`PluginDefinition`] is identified by its `(name, version)` pair. Its
//! priority only orders definitions, and its active flag is the one piece of
//! state that changes after creation. Definitions are shared as
//! `Arc<PluginDefinition>` so that a flag flipped by the registry is observed
//! by every loaded plugin wrapper the next time it is read.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::settings::{EmptySettings, PluginSettings};

// =============================================================================
// PluginDefinition
// =============================================================================

/// Declares one plugin: where to load it from, in which order it runs, its
/// settings, and whether it currently participates.
pub struct PluginDefinition {
    name: String,
    location: String,
    version: String,
    priority: i64,
    settings: Arc<dyn PluginSettings>,
    active: AtomicBool,
}

impl PluginDefinition {
    /// Creates an active definition with priority 0 and empty settings.
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            version: version.into(),
            priority: 0,
            settings: Arc::new(EmptySettings),
            active: AtomicBool::new(true),
        }
    }

    /// Sets the priority (builder pattern).
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the settings (builder pattern).
    pub fn with_settings(mut self, settings: Arc<dyn PluginSettings>) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the initial active flag (builder pattern).
    pub fn with_active(self, active: bool) -> Self {
        self.active.store(active, Ordering::SeqCst);
        self
    }

    /// Plugin name; also the origin tag of messages a worker emits.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load location handed to the component loader.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Plugin version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Ordering key; lower runs first.
    pub fn priority(&self) -> i64 {
        self.priority
    }

    /// The plugin's settings.
    pub fn settings(&self) -> Arc<dyn PluginSettings> {
        Arc::clone(&self.settings)
    }

    /// Reads the active flag at this moment.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Flips the active flag.
    ///
    /// Callers outside the registry should go through `PluginRegistry::activate`
    /// and `PluginRegistry::deactivate` so listeners are notified.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Returns `true` if both definitions share the same `(name, version)`.
    pub fn same_identity(&self, other: &PluginDefinition) -> bool {
        self.name == other.name && self.version == other.version
    }

    /// Returns `true` if this definition is `(name, version)`.
    pub fn matches(&self, name: &str, version: &str) -> bool {
        self.name == name && self.version == version
    }
}

impl Clone for PluginDefinition {
    /// Copies the definition, taking a snapshot of the active flag.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            location: self.location.clone(),
            version: self.version.clone(),
            priority: self.priority,
            settings: Arc::clone(&self.settings),
            active: AtomicBool::new(self.is_active()),
        }
    }
}

impl fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("version", &self.version)
            .field("priority", &self.priority)
            .field("active", &self.is_active())
            .finish()
    }
}

impl fmt::Display for PluginDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{})", self.name, self.version)
    }
}

/// Resolves the priority of the definition declared at `position`.
///
/// Non-positive declared priorities fall back to the declaration index, which
/// keeps unprioritized plugins in file order.
pub fn resolve_priority(declared: i64, position: usize) -> i64 {
    if declared < 1 {
        position as i64
    } else {
        declared
    }
}

/// Sorts a snapshot ascending by priority. The sort is stable.
pub fn sort_by_priority(snapshot: &mut [Arc<PluginDefinition>]) {
    snapshot.sort_by_key(|def| def.priority());
}

// =============================================================================
// Status
// =============================================================================

/// Status of a `(name, version)` pair within one snapshot.
///
/// Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginDefinitionStatus {
    /// Present with the active flag set.
    Active,
    /// Present with the active flag cleared.
    Inactive,
    /// Not present.
    Missing,
}

impl PluginDefinitionStatus {
    /// Looks up `definition`'s identity in `snapshot`.
    ///
    /// The first entry with a matching identity decides.
    pub fn of(snapshot: &[Arc<PluginDefinition>], definition: &PluginDefinition) -> Self {
        match snapshot.iter().find(|d| d.same_identity(definition)) {
            Some(d) if d.is_active() => Self::Active,
            Some(_) => Self::Inactive,
            None => Self::Missing,
        }
    }
}

impl fmt::Display for PluginDefinitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

// =============================================================================
// DefinitionSource
// =============================================================================

/// Read view of the live configuration, handed to plugin constructors.
pub trait DefinitionSource: Send + Sync {
    /// Current definitions in priority order.
    fn definitions(&self) -> Vec<Arc<PluginDefinition>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, version: &str, active: bool) -> Arc<PluginDefinition> {
        Arc::new(PluginDefinition::new(name, format!("/plugins/{name}"), version).with_active(active))
    }

    #[test]
    fn test_status_lookup() {
        let snapshot = vec![def("a", "1.0.0", true), def("b", "1.0.0", false)];

        assert_eq!(
            PluginDefinitionStatus::of(&snapshot, &def("a", "1.0.0", false)),
            PluginDefinitionStatus::Active
        );
        assert_eq!(
            PluginDefinitionStatus::of(&snapshot, &def("b", "1.0.0", true)),
            PluginDefinitionStatus::Inactive
        );
        assert_eq!(
            PluginDefinitionStatus::of(&snapshot, &def("a", "2.0.0", true)),
            PluginDefinitionStatus::Missing
        );
    }

    #[test]
    fn test_default_priority_is_declaration_index() {
        let declared = [0, -4, 0, 0];
        let resolved: Vec<i64> = declared
            .iter()
            .enumerate()
            .map(|(i, p)| resolve_priority(*p, i))
            .collect();
        assert_eq!(resolved, vec![0, 1, 2, 3]);
        assert_eq!(resolve_priority(7, 0), 7);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut snapshot = vec![
            Arc::new(PluginDefinition::new("c", "/c", "1").with_priority(2)),
            Arc::new(PluginDefinition::new("a", "/a", "1").with_priority(1)),
            Arc::new(PluginDefinition::new("b", "/b", "1").with_priority(1)),
        ];
        sort_by_priority(&mut snapshot);
        let names: Vec<&str> = snapshot.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clone_snapshots_active_flag() {
        let original = PluginDefinition::new("a", "/a", "1");
        let copy = original.clone();
        original.set_active(false);

        assert!(!original.is_active());
        assert!(copy.is_active());
        assert_eq!(original.to_string(), "a (v1)");
    }
}
