//! Data models for provider launch configuration.

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use inquest_types::UpstreamConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ValidationError;

/// Startup and request timeout used when a provider does not set one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Every provider the orchestrator knows how to launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProvidersConfig {
    /// Map of provider names to launch settings.
    #[serde(default)]
    pub providers: IndexMap<String, ProviderSettings>,
    /// Upstream passed along with every connect request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,
}

impl ProvidersConfig {
    /// Names of providers that are not disabled, in file order.
    pub fn enabled(&self) -> impl Iterator<Item = (&str, &ProviderSettings)> {
        self.providers
            .iter()
            .filter(|(_, settings)| !settings.disabled)
            .map(|(name, settings)| (name.as_str(), settings))
    }
}

/// How to launch one provider process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProviderSettings {
    /// Executable to run.
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment variables for the process.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,

    /// Working directory for the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub disabled: bool,

    /// Startup handshake and per-request timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ProviderSettings {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }
}

/// Errors raised while loading or saving provider configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_use_camel_case_keys() {
        let config: ProvidersConfig = serde_json::from_value(json!({
            "providers": {
                "os": {"command": "inquest-os", "args": ["serve"], "timeoutSeconds": 5},
                "k8s": {"command": "inquest-k8s", "disabled": true}
            },
            "upstream": {"endpoint": "https://upstream.example.com", "spaceMrn": "//spaces/dev"}
        }))
        .expect("config");

        let os = &config.providers["os"];
        assert_eq!(os.timeout(), Duration::from_secs(5));
        assert_eq!(config.providers["k8s"].timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
        assert_eq!(config.enabled().map(|(name, _)| name).collect::<Vec<_>>(), vec!["os"]);
        assert_eq!(config.upstream.as_ref().map(|upstream| upstream.space_mrn.as_str()), Some("//spaces/dev"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed = serde_json::from_value::<ProviderSettings>(json!({"command": "x", "baseUrl": "http://x"}));
        assert!(parsed.is_err());
    }
}
