//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, PluginConfig, SluiceConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &SluiceConfig) -> ConfigResult<()> {
    validate_plugins(&config.plugins)?;

    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    Ok(())
}

/// Validates all plugin entries.
fn validate_plugins(plugins: &[PluginConfig]) -> ConfigResult<()> {
    let mut seen = HashSet::new();

    for (index, plugin) in plugins.iter().enumerate() {
        validate_plugin(index, plugin)?;

        if !seen.insert((plugin.name.as_str(), plugin.version.as_str())) {
            return Err(ConfigError::DuplicatePlugin {
                name: plugin.name.clone(),
                version: plugin.version.clone(),
            });
        }
    }

    Ok(())
}

/// Validates a single plugin entry.
fn validate_plugin(index: usize, plugin: &PluginConfig) -> ConfigResult<()> {
    for (field, value) in [
        ("name", &plugin.name),
        ("path", &plugin.path),
        ("version", &plugin.version),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::missing_field(format!("plugin[{index}].{field}")));
        }
    }

    if plugin
        .settings_file
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        return Err(ConfigError::validation(format!(
            "plugin[{index}].settings_file must not be empty"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(plugins: Vec<PluginConfig>) -> SluiceConfig {
        SluiceConfig {
            plugins,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let cfg = config(vec![
            PluginConfig::new("a", "/a.so", "1.0.0"),
            PluginConfig::new("a", "/a2.so", "2.0.0"),
        ]);
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_empty_field_rejected() {
        let cfg = config(vec![
            PluginConfig::new("a", "/a.so", "1.0.0"),
            PluginConfig::new("b", "  ", "1.0.0"),
        ]);
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "plugin[1].path"));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let cfg = config(vec![
            PluginConfig::new("a", "/a.so", "1.0.0"),
            PluginConfig::new("a", "/other.so", "1.0.0"),
        ]);
        let err = validate_config(&cfg).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate plugin definition: a (v1.0.0)");
    }

    #[test]
    fn test_file_output_requires_path() {
        let mut cfg = config(Vec::new());
        cfg.logging.output = LogOutput::File;
        assert!(validate_config(&cfg).is_err());
    }
}
