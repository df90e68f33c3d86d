//! ProviderManager: registry and lifecycle of launched providers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use inquest_engine::ProviderCallback;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::ProviderClient;
use crate::config::ProvidersConfig;
use crate::error::PluginError;

/// Launches providers on demand and keeps one client per provider name.
#[derive(Clone)]
pub struct ProviderManager {
    /// Running clients keyed by provider name.
    clients: Arc<Mutex<HashMap<String, Arc<ProviderClient>>>>,
    /// Names currently being launched.
    starting: Arc<Mutex<HashSet<String>>>,
    config: ProvidersConfig,
    callback: Option<Arc<dyn ProviderCallback>>,
}

impl ProviderManager {
    pub fn new(config: ProvidersConfig, callback: Option<Arc<dyn ProviderCallback>>) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            starting: Arc::new(Mutex::new(HashSet::new())),
            config,
            callback,
        }
    }

    pub fn config(&self) -> &ProvidersConfig {
        &self.config
    }

    /// Return the running client for `name`, launching the provider if needed.
    ///
    /// A provider that is still being launched by another caller fails with
    /// [`PluginError::Starting`] rather than being launched twice.
    pub async fn start(&self, name: &str) -> Result<Arc<ProviderClient>, PluginError> {
        let settings = self
            .config
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::configuration(format!("provider '{name}' is not configured")))?;
        if settings.disabled {
            return Err(PluginError::configuration(format!("provider '{name}' is disabled")));
        }

        if let Some(client) = self.clients.lock().await.get(name) {
            return Ok(Arc::clone(client));
        }
        if !self.starting.lock().await.insert(name.to_string()) {
            return Err(PluginError::Starting { provider: name.to_string() });
        }

        // Launch outside of the registry locks
        let launched = ProviderClient::spawn(name, &settings, self.callback.clone()).await;
        self.starting.lock().await.remove(name);

        let client = Arc::new(launched?);
        self.clients.lock().await.insert(name.to_string(), Arc::clone(&client));
        info!(provider = %name, version = %client.descriptor().version, "provider started");
        Ok(client)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ProviderClient>> {
        self.clients.lock().await.get(name).cloned()
    }

    /// Names of running providers.
    pub async fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Shut a running provider down. Stopping a provider that is not running is a no-op.
    pub async fn stop(&self, name: &str) -> Result<(), PluginError> {
        let client = self.clients.lock().await.remove(name);
        match client {
            Some(client) => client.shutdown().await,
            None => Ok(()),
        }
    }

    /// Shut every running provider down.
    pub async fn stop_all(&self) {
        let clients: Vec<(String, Arc<ProviderClient>)> = self.clients.lock().await.drain().collect();
        for (name, client) in clients {
            if let Err(error) = client.shutdown().await {
                warn!(provider = %name, error = %error, "provider shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    fn manager() -> ProviderManager {
        let mut config = ProvidersConfig::default();
        config.providers.insert(
            "os".into(),
            ProviderSettings {
                disabled: true,
                ..ProviderSettings::new("inquest-os")
            },
        );
        config
            .providers
            .insert("missing".into(), ProviderSettings::new("/nonexistent/inquest-provider"));
        ProviderManager::new(config, None)
    }

    #[tokio::test]
    async fn unknown_and_disabled_providers_are_not_started() {
        let manager = manager();
        assert!(matches!(manager.start("k8s").await, Err(PluginError::Configuration { .. })));
        assert!(matches!(manager.start("os").await, Err(PluginError::Configuration { .. })));
        assert!(manager.running().await.is_empty());
    }

    #[tokio::test]
    async fn launch_failures_release_the_reservation() {
        let manager = manager();
        assert!(matches!(manager.start("missing").await, Err(PluginError::Connection { .. })));
        assert!(matches!(manager.start("missing").await, Err(PluginError::Connection { .. })));
        assert!(manager.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn stopping_an_idle_provider_is_a_no_op() {
        assert!(manager().stop("os").await.is_ok());
    }
}
