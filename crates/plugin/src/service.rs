//! Runtime multiplexer hosted by every provider process.
//!
//! One [`PluginService`] serves many connections at once. Connections are
//! keyed by a fingerprint of their configuration so that reconnecting with
//! identical options reuses the existing runtime, including its detected
//! platform and every resource already computed on it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use inquest_engine::{Connection, EngineError, ProviderCallback, Runtime, SchemaRegistry};
use inquest_types::{Asset, ConnectionConfig, FieldResult};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::protocol::{
    ConnectRequest, ConnectResponse, GetDataRequest, MockConnectRequest, ParseCliResponse, RecordingSource, StoreDataRequest,
    StoreDataResponse,
};
use crate::provider::{Capability, ParseCliRequest, Provider, ProviderDescriptor, check_cli};
use crate::recording::{RecordedAsset, Recording, restore};

/// Identifies a runtime independently of the connection id it was assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Live(u64),
    Replay(u64),
}

impl Fingerprint {
    pub fn live(config: &ConnectionConfig) -> Self {
        Fingerprint::Live(config.fingerprint())
    }

    pub fn replay(config: &ConnectionConfig) -> Self {
        Fingerprint::Replay(config.fingerprint())
    }
}

struct RuntimeEntry<C: Connection> {
    runtime: Arc<Runtime<C>>,
    fingerprint: Fingerprint,
}

type RuntimeSlot<C> = Arc<OnceCell<Arc<Runtime<C>>>>;

/// Serves [`Provider`] operations for any number of concurrent connections.
pub struct PluginService<P: Provider> {
    provider: P,
    descriptor: ProviderDescriptor,
    schemas: Arc<SchemaRegistry<P::Connection>>,
    runtimes: Mutex<HashMap<u32, RuntimeEntry<P::Connection>>>,
    fingerprints: Mutex<HashMap<Fingerprint, RuntimeSlot<P::Connection>>>,
    next_id: AtomicU32,
}

impl<P: Provider> PluginService<P> {
    pub fn new(provider: P) -> Self {
        let descriptor = provider.descriptor();
        let schemas = provider.schemas();
        Self {
            provider,
            descriptor,
            schemas,
            runtimes: Mutex::new(HashMap::new()),
            fingerprints: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.runtimes.lock().expect("runtime table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parse_cli(&self, request: &ParseCliRequest) -> Result<ParseCliResponse, PluginError> {
        check_cli(&self.descriptor, request)?;
        let asset = self.provider.parse_cli(request)?;
        Ok(ParseCliResponse { asset })
    }

    /// Return the runtime for `fingerprint`, building it with `factory` when none exists.
    ///
    /// Concurrent callers with the same fingerprint share one factory call.
    /// A failed factory call is not remembered, so the next caller retries.
    /// The flag is `true` for the caller whose factory built the runtime.
    pub async fn add_runtime<F, Fut>(&self, fingerprint: Fingerprint, factory: F) -> Result<(Arc<Runtime<P::Connection>>, bool), PluginError>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = Result<Arc<Runtime<P::Connection>>, PluginError>>,
    {
        let slot = {
            let mut fingerprints = self.fingerprints.lock().expect("fingerprint table lock poisoned");
            Arc::clone(fingerprints.entry(fingerprint).or_default())
        };

        let mut created = false;
        let created_flag = &mut created;
        let runtime = slot
            .get_or_try_init(|| async move {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                let runtime = factory(id).await?;
                self.runtimes.lock().expect("runtime table lock poisoned").insert(
                    id,
                    RuntimeEntry {
                        runtime: Arc::clone(&runtime),
                        fingerprint,
                    },
                );
                *created_flag = true;
                Ok::<_, PluginError>(runtime)
            })
            .await?
            .clone();

        if !created {
            debug!(connection_id = runtime.connection().id(), ?fingerprint, "reusing runtime");
        }
        Ok((runtime, created))
    }

    /// Connect to the first connection config of the requested asset.
    ///
    /// Platform detection runs only when the asset has no platform yet and
    /// only for the first connect with a given configuration.
    pub async fn connect(
        &self,
        request: ConnectRequest,
        callback: Option<Arc<dyn ProviderCallback>>,
    ) -> Result<ConnectResponse, PluginError> {
        let ConnectRequest { asset, upstream } = request;
        let config = self.connection_config(&asset)?;
        let fingerprint = Fingerprint::live(&config);

        let (runtime, created) = self
            .add_runtime(fingerprint, |id| async move {
                let connection = self
                    .provider
                    .connect(id, &config, &asset)
                    .await
                    .map_err(PluginError::connection)?;

                let mut asset = asset;
                if asset.platform.is_none() {
                    match self.provider.detect(&connection, &asset).await {
                        Ok(detection) => {
                            asset.platform = Some(detection.platform);
                            for platform_id in detection.platform_ids {
                                if !asset.platform_ids.contains(&platform_id) {
                                    asset.platform_ids.push(platform_id);
                                }
                            }
                        }
                        Err(error) => {
                            warn!(connection_id = id, connector = %config.connector, error = %format!("{error:#}"), "platform detection failed");
                            connection.close();
                            return Err(PluginError::connection(error));
                        }
                    }
                }
                bind_connection(&mut asset, config, id);

                let mut builder = Runtime::builder(connection, Arc::clone(&self.schemas))
                    .asset(asset)
                    .upstream(upstream);
                if let Some(callback) = callback {
                    builder = builder.callback(callback);
                }
                Ok(builder.build())
            })
            .await?;

        if created {
            info!(connection_id = runtime.connection().id(), provider = %self.descriptor.id, "connected");
        }
        Ok(connected(&runtime))
    }

    /// Connect to a recorded asset instead of a live target.
    pub async fn mock_connect(
        &self,
        request: MockConnectRequest,
        callback: Option<Arc<dyn ProviderCallback>>,
    ) -> Result<ConnectResponse, PluginError> {
        self.require(Capability::Replay)?;

        let recording = match request.recording {
            RecordingSource::Path(path) => Recording::load(&path)?,
            RecordingSource::Inline(recording) => recording,
        };
        let recorded = recording
            .find_asset(&request.asset)
            .cloned()
            .ok_or_else(|| PluginError::recording(format!("no recorded asset matches '{}'", request.asset.name)))?;

        let config = self
            .connection_config(&request.asset)
            .or_else(|_| self.connection_config(&recorded.asset))?;
        let fingerprint = Fingerprint::replay(&config);

        let (runtime, _) = self
            .add_runtime(fingerprint, |id| async move {
                let connection = self
                    .provider
                    .mock_connect(id, &config, &recorded.asset)
                    .await
                    .map_err(PluginError::connection)?;

                let mut asset = replayed_asset(&recorded, request.asset);
                bind_connection(&mut asset, config, id);

                let mut builder = Runtime::builder(connection, Arc::clone(&self.schemas)).asset(asset);
                if let Some(callback) = callback {
                    builder = builder.callback(callback);
                }
                let runtime = builder.build();
                if let Err(error) = recorded.seed(&runtime).await {
                    runtime.close();
                    return Err(error);
                }
                Ok(runtime)
            })
            .await?;

        Ok(connected(&runtime))
    }

    pub fn get_runtime(&self, connection: u32) -> Result<Arc<Runtime<P::Connection>>, PluginError> {
        self.runtimes
            .lock()
            .expect("runtime table lock poisoned")
            .get(&connection)
            .map(|entry| Arc::clone(&entry.runtime))
            .ok_or(PluginError::NotFound { connection_id: connection })
    }

    /// Close one connection and drop its resources.
    pub fn disconnect(&self, connection: u32) -> Result<(), PluginError> {
        let entry = self
            .runtimes
            .lock()
            .expect("runtime table lock poisoned")
            .remove(&connection)
            .ok_or(PluginError::NotFound { connection_id: connection })?;
        self.fingerprints
            .lock()
            .expect("fingerprint table lock poisoned")
            .remove(&entry.fingerprint);
        entry.runtime.close();
        Ok(())
    }

    /// Close every connection.
    pub fn shutdown(&self) {
        let entries: Vec<RuntimeEntry<P::Connection>> = self
            .runtimes
            .lock()
            .expect("runtime table lock poisoned")
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        self.fingerprints.lock().expect("fingerprint table lock poisoned").clear();
        for entry in &entries {
            entry.runtime.close();
        }
        info!(provider = %self.descriptor.id, closed = entries.len(), "provider shut down");
    }

    /// Read a field, creating the resource from the request arguments when needed.
    ///
    /// Field failures are part of a successful response; only failures to
    /// locate the connection or build the resource are errors.
    pub async fn get_data(&self, request: GetDataRequest) -> Result<FieldResult, PluginError> {
        let runtime = self.get_runtime(request.connection)?;
        let resource = runtime.get_or_create(&request.resource, request.args).await?;
        let Some(field) = request.field else {
            return Ok(FieldResult::Data(resource.to_raw_data()));
        };

        match resource.get_data(&field).await {
            Ok(data) => Ok(FieldResult::Data(data)),
            Err(EngineError::Field { source, .. }) => Ok(FieldResult::Error { error: source.to_string() }),
            Err(error) => Err(error.into()),
        }
    }

    /// Create the pushed resources with their fields already settled.
    pub async fn store_data(&self, request: StoreDataRequest) -> Result<StoreDataResponse, PluginError> {
        self.require(Capability::Store)?;
        let runtime = self.get_runtime(request.connection)?;

        let mut stored = Vec::with_capacity(request.resources.len());
        for snapshot in request.resources {
            let resource = restore(&runtime, snapshot).await?;
            stored.push(resource.reference());
        }
        debug!(connection_id = request.connection, stored = stored.len(), "stored pushed resources");
        Ok(StoreDataResponse { stored })
    }

    /// Capture the connection's asset and settled resources for later replay.
    pub fn capture(&self, connection: u32) -> Result<RecordedAsset, PluginError> {
        let runtime = self.get_runtime(connection)?;
        let mut recording = Recording::default();
        recording.capture(&runtime);
        recording
            .assets
            .pop()
            .ok_or_else(|| PluginError::recording(format!("connection {connection} has nothing to record")))
    }

    fn require(&self, capability: Capability) -> Result<(), PluginError> {
        if self.descriptor.supports(capability) {
            return Ok(());
        }
        Err(PluginError::Unsupported {
            provider: self.descriptor.id.clone(),
            capability,
        })
    }

    fn connection_config(&self, asset: &Asset) -> Result<ConnectionConfig, PluginError> {
        let config = asset
            .connections
            .first()
            .cloned()
            .ok_or_else(|| PluginError::configuration(format!("asset '{}' has no connection configuration", asset.name)))?;
        if self.descriptor.connector(&config.connector).is_none() {
            return Err(PluginError::UnknownConnector {
                provider: self.descriptor.id.clone(),
                connector: config.connector,
            });
        }
        Ok(config)
    }
}

/// Put `config`, now carrying its assigned id, first in the asset's connection list.
fn bind_connection(asset: &mut Asset, mut config: ConnectionConfig, id: u32) {
    config.id = Some(id);
    match asset.connections.first_mut() {
        Some(first) => *first = config,
        None => asset.connections.push(config),
    }
}

/// The recorded asset, keeping identifiers the caller already knows.
fn replayed_asset(recorded: &RecordedAsset, requested: Asset) -> Asset {
    let mut asset = recorded.asset.clone();
    if !requested.id.is_empty() {
        asset.id = requested.id;
    }
    if asset.name.is_empty() {
        asset.name = requested.name;
    }
    if !requested.connections.is_empty() {
        asset.connections = requested.connections;
    }
    asset
}

fn connected<C: Connection>(runtime: &Runtime<C>) -> ConnectResponse {
    ConnectResponse {
        id: runtime.connection().id(),
        name: runtime.connection().name().to_string(),
        asset: runtime.asset(),
    }
}
