//! Configuration IO helpers for provider launch settings.

use std::env;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

use dirs_next::config_dir;
use inquest_util::expand_tilde;

use crate::config::{ConfigError, ProvidersConfig, validate_config};

/// Environment variable overriding the configuration location.
pub const PROVIDERS_PATH_ENV: &str = "INQUEST_PROVIDERS_PATH";

/// Returns the default path for the provider configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(PROVIDERS_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inquest")
        .join("providers.json")
}

/// Loads and validates provider configuration from the default path.
pub fn load_config() -> Result<ProvidersConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Loads and validates provider configuration from a specific path.
///
/// A missing file yields the empty configuration.
pub fn load_config_from_path(path: &Path) -> Result<ProvidersConfig, ConfigError> {
    if !path.exists() {
        return Ok(ProvidersConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ProvidersConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Saves provider configuration to a specific path.
pub fn save_config_to_path(config: &ProvidersConfig, path: &Path) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent_directory) = path.parent() {
        create_dir_all(parent_directory).map_err(io_error)?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use tempfile::tempdir;

    #[test]
    fn default_path_honors_environment_override() {
        let override_path = "~/custom/inquest/providers.json";
        temp_env::with_var(PROVIDERS_PATH_ENV, Some(override_path), || {
            assert_eq!(default_config_path(), expand_tilde(override_path));
        });
    }

    #[test]
    fn blank_override_falls_back_to_config_dir() {
        temp_env::with_var(PROVIDERS_PATH_ENV, Some("  "), || {
            assert!(default_config_path().ends_with("inquest/providers.json"));
        });
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("providers.json")).expect("default config");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("providers.json");
        let mut config = ProvidersConfig::default();
        config.providers.insert("os".into(), ProviderSettings::new("inquest-os"));

        save_config_to_path(&config, &path).expect("save");
        assert_eq!(load_config_from_path(&path).expect("load"), config);
    }

    #[test]
    fn invalid_files_are_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("providers.json");
        fs::write(&path, r#"{"providers": {"OS": {"command": "inquest-os"}}}"#).expect("write");
        assert!(matches!(load_config_from_path(&path), Err(ConfigError::Validation(_))));

        fs::write(&path, "{not json").expect("write");
        assert!(matches!(load_config_from_path(&path), Err(ConfigError::Parse { .. })));
    }
}
