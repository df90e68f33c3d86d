//! Configuration validation for provider launch settings.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::config::{ProviderSettings, ProvidersConfig};

static NAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9._-]+$").expect("provider name regex should compile"));
static ENV_KEY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("env key regex should compile"));

/// Validate the entire provider configuration.
pub fn validate_config(config: &ProvidersConfig) -> Result<(), ValidationError> {
    for (name, settings) in &config.providers {
        validate_provider_name(name)?;
        validate_provider(name, settings)?;
        debug!(provider = %name, "validated provider configuration");
    }
    if let Some(upstream) = &config.upstream
        && upstream.is_enabled()
        && !(upstream.endpoint.starts_with("http://") || upstream.endpoint.starts_with("https://"))
    {
        return Err(ValidationError::InvalidUpstream {
            reason: format!("unsupported endpoint {} (expected http/https)", upstream.endpoint),
        });
    }
    Ok(())
}

/// Validate a provider name.
pub fn validate_provider_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidProviderName {
            name: name.to_string(),
            reason: "Provider name cannot be empty".to_string(),
        });
    }
    if !NAME_REGEX.is_match(name) {
        return Err(ValidationError::InvalidProviderName {
            name: name.to_string(),
            reason: "Provider name must contain only lowercase letters, numbers, dots, underscores, and hyphens".to_string(),
        });
    }
    Ok(())
}

fn validate_provider(name: &str, settings: &ProviderSettings) -> Result<(), ValidationError> {
    if settings.command.trim().is_empty() {
        return Err(ValidationError::MissingCommand { name: name.to_string() });
    }
    if settings.timeout_seconds == Some(0) {
        return Err(ValidationError::InvalidTimeout { name: name.to_string() });
    }
    for key in settings.env.keys() {
        if !ENV_KEY_REGEX.is_match(key) {
            return Err(ValidationError::InvalidEnvKey {
                key: key.clone(),
                reason: "Environment variable keys must start with uppercase letter or underscore, followed by uppercase letters, numbers, or underscores".to_string(),
            });
        }
    }
    Ok(())
}

/// Errors that can occur during validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid provider name '{name}': {reason}")]
    InvalidProviderName { name: String, reason: String },

    #[error("Provider '{name}' has no command")]
    MissingCommand { name: String },

    #[error("Provider '{name}' must use a timeout greater than zero")]
    InvalidTimeout { name: String },

    #[error("Invalid environment variable key '{key}': {reason}")]
    InvalidEnvKey { key: String, reason: String },

    #[error("Invalid upstream configuration: {reason}")]
    InvalidUpstream { reason: String },
}
