//! Conversion of a loaded configuration into a registry snapshot.

use std::path::Path;
use std::sync::Arc;

use sluice_core::definition::{resolve_priority, sort_by_priority};
use sluice_core::{PluginDefinition, PluginSettings};

use super::schema::{PluginConfig, SluiceConfig};
use crate::settings::FileSettings;

/// Builds the definitions declared by `config`, sorted by priority.
///
/// Relative `settings_file` paths resolve against `base_dir`, normally the
/// directory of the configuration file.
pub fn build_snapshot(config: &SluiceConfig, base_dir: Option<&Path>) -> Vec<Arc<PluginDefinition>> {
    let mut snapshot: Vec<Arc<PluginDefinition>> = config
        .plugins
        .iter()
        .enumerate()
        .map(|(index, plugin)| {
            let settings = plugin_settings(plugin, base_dir, config.inherit_settings_from_env);
            Arc::new(
                PluginDefinition::new(&plugin.name, &plugin.path, &plugin.version)
                    .with_priority(resolve_priority(plugin.priority, index))
                    .with_settings(settings)
                    .with_active(plugin.active),
            )
        })
        .collect();

    sort_by_priority(&mut snapshot);
    snapshot
}

fn plugin_settings(
    plugin: &PluginConfig,
    base_dir: Option<&Path>,
    env_override: bool,
) -> Arc<dyn PluginSettings> {
    let settings = match &plugin.settings_file {
        Some(file) => {
            let path = match base_dir {
                Some(dir) if file.is_relative() => dir.join(file),
                _ => file.clone(),
            };
            FileSettings::load(&path, env_override)
        }
        None => FileSettings::empty(env_override),
    };
    Arc::new(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(snapshot: &[Arc<PluginDefinition>]) -> Vec<&str> {
        snapshot.iter().map(|d| d.name()).collect()
    }

    #[test]
    fn test_default_priority_keeps_file_order() {
        let config = SluiceConfig {
            plugins: vec![
                PluginConfig::new("a", "/a", "1"),
                PluginConfig::new("b", "/b", "1"),
                PluginConfig::new("c", "/c", "1"),
            ],
            ..Default::default()
        };

        let snapshot = build_snapshot(&config, None);

        assert_eq!(names(&snapshot), vec!["a", "b", "c"]);
        let priorities: Vec<i64> = snapshot.iter().map(|d| d.priority()).collect();
        assert_eq!(priorities, vec![0, 1, 2]);
    }

    #[test]
    fn test_declared_priority_sorts() {
        let mut first = PluginConfig::new("first", "/f", "1");
        first.priority = 10;
        let mut tied = PluginConfig::new("tied", "/t", "1");
        tied.priority = 1;

        // "plain" at index 1 resolves to priority 1 and keeps its place before "tied".
        let config = SluiceConfig {
            plugins: vec![first, PluginConfig::new("plain", "/p", "1"), tied],
            ..Default::default()
        };

        let snapshot = build_snapshot(&config, None);
        assert_eq!(names(&snapshot), vec!["plain", "tied", "first"]);
    }

    #[test]
    fn test_active_flag_carried() {
        let mut off = PluginConfig::new("off", "/off", "1");
        off.active = false;
        let config = SluiceConfig {
            plugins: vec![PluginConfig::new("on", "/on", "1"), off],
            ..Default::default()
        };

        let snapshot = build_snapshot(&config, None);
        assert!(snapshot[0].is_active());
        assert!(!snapshot[1].is_active());
    }

    #[test]
    fn test_relative_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("reader.toml"), "endpoint = \"tcp://in\"\n").unwrap();

        let mut reader = PluginConfig::new("reader", "/reader", "1");
        reader.settings_file = Some("reader.toml".into());
        let mut broken = PluginConfig::new("broken", "/broken", "1");
        broken.settings_file = Some("missing.toml".into());

        let config = SluiceConfig {
            plugins: vec![reader, broken],
            ..Default::default()
        };

        let snapshot = build_snapshot(&config, Some(dir.path()));
        assert_eq!(
            snapshot[0].settings().get_str("endpoint").as_deref(),
            Some("tcp://in")
        );
        assert_eq!(snapshot[1].settings().get("endpoint"), None);
    }
}
