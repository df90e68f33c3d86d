//! Provider launch configuration.
//! This module handles parsing and validation of the
//! ~/.config/inquest/providers.json configuration file.

mod io;
mod model;
mod validation;

pub use io::{PROVIDERS_PATH_ENV, default_config_path, load_config, load_config_from_path, save_config_to_path};
pub use model::{ConfigError, DEFAULT_TIMEOUT_SECONDS, ProviderSettings, ProvidersConfig};
pub use validation::{ValidationError, validate_config, validate_provider_name};
