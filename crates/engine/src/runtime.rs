//! Per-connection execution context.
//!
//! A [`Runtime`] binds one connection to the registry of resource instances
//! created on it. The registry is the only shared mutable state touched by
//! concurrent callers; its check-then-insert step runs under a single lock so
//! that one (resource, id) pair maps to exactly one instance.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use inquest_types::{Asset, FieldResult, RawData, UpstreamConfig};
use inquest_util::Memoizer;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callback::{CallbackMessage, ProviderCallback};
use crate::connection::Connection;
use crate::error::EngineError;
use crate::resource::Resource;
use crate::schema::{Args, InitOutcome, ResourceSchema, SchemaRegistry};
use crate::telemetry::{HttpUpstream, TelemetryEvent, TelemetrySink, TracingSink};

type ResourceKey = (String, String);

/// Settled fields of one instance, as captured for recordings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub resource: String,
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldResult>,
}

/// Assembles a [`Runtime`].
pub struct RuntimeBuilder<C: Connection> {
    connection: Arc<C>,
    schemas: Arc<SchemaRegistry<C>>,
    asset: Asset,
    callback: Option<Arc<dyn ProviderCallback>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    upstream: Option<UpstreamConfig>,
}

impl<C: Connection> RuntimeBuilder<C> {
    pub fn asset(mut self, asset: Asset) -> Self {
        self.asset = asset;
        self
    }

    pub fn callback(mut self, callback: Arc<dyn ProviderCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Report resolution telemetry to this upstream unless a sink was set explicitly.
    pub fn upstream(mut self, upstream: Option<UpstreamConfig>) -> Self {
        self.upstream = upstream.filter(UpstreamConfig::is_enabled);
        self
    }

    /// Build the runtime. Reporting to an upstream starts a background task,
    /// so this must run inside a Tokio runtime when one is configured.
    pub fn build(self) -> Arc<Runtime<C>> {
        let telemetry = match (self.telemetry, &self.upstream) {
            (Some(sink), _) => sink,
            (None, Some(upstream)) => match HttpUpstream::spawn(upstream) {
                Ok(reporter) => Arc::new(reporter) as Arc<dyn TelemetrySink>,
                Err(error) => {
                    warn!(error = %error, endpoint = %upstream.endpoint, "upstream reporting disabled");
                    Arc::new(TracingSink)
                }
            },
            (None, None) => Arc::new(TracingSink),
        };

        Arc::new(Runtime {
            connection: self.connection,
            schemas: self.schemas,
            asset: RwLock::new(self.asset),
            resources: Mutex::new(HashMap::new()),
            callback: self.callback,
            telemetry,
            upstream: self.upstream,
            lookups: Memoizer::forever(),
            detached_ids: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }
}

/// Execution context for one connection.
pub struct Runtime<C: Connection> {
    connection: Arc<C>,
    schemas: Arc<SchemaRegistry<C>>,
    asset: RwLock<Asset>,
    resources: Mutex<HashMap<ResourceKey, Arc<Resource<C>>>>,
    callback: Option<Arc<dyn ProviderCallback>>,
    telemetry: Arc<dyn TelemetrySink>,
    upstream: Option<UpstreamConfig>,
    lookups: Memoizer<RawData>,
    detached_ids: AtomicU64,
    shutdown: CancellationToken,
}

impl<C: Connection> std::fmt::Debug for Runtime<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("connection_id", &self.connection.id())
            .field("connection", &self.connection.name())
            .field("resources", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: Connection> Runtime<C> {
    pub fn builder(connection: C, schemas: Arc<SchemaRegistry<C>>) -> RuntimeBuilder<C> {
        RuntimeBuilder {
            connection: Arc::new(connection),
            schemas,
            asset: Asset::default(),
            callback: None,
            telemetry: None,
            upstream: None,
        }
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    pub fn schemas(&self) -> &SchemaRegistry<C> {
        &self.schemas
    }

    pub fn upstream(&self) -> Option<&UpstreamConfig> {
        self.upstream.as_ref()
    }

    pub fn asset(&self) -> Asset {
        self.asset.read().expect("asset lock poisoned").clone()
    }

    pub fn update_asset(&self, update: impl FnOnce(&mut Asset)) {
        update(&mut self.asset.write().expect("asset lock poisoned"));
    }

    /// Fires when the runtime closes; field computations started through
    /// [`Resource::get_value`] stop waiting at that point.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Create an instance of `name` from `args`.
    ///
    /// The initializer runs first and may derive further arguments or return an
    /// existing instance. If an instance with the derived id is already
    /// registered, that instance is returned and the new arguments are dropped.
    pub async fn create(self: &Arc<Self>, name: &str, args: Args) -> Result<Arc<Resource<C>>, EngineError> {
        self.ensure_open()?;
        let schema = Arc::clone(self.schemas.get(name)?);
        if schema.is_detached() {
            return Err(EngineError::Detached { resource: name.to_string() });
        }

        let args = match self.initialize(&schema, args).await? {
            InitOutcome::Existing(resource) => return Ok(resource),
            InitOutcome::Args(args) => args,
        };
        let id = schema.derive_id(&args)?;
        Ok(self.register(schema, id, args))
    }

    /// Return the registered instance matching the identity of `args`, or create it.
    ///
    /// The identity is derived from `args` alone; the initializer only runs when
    /// no matching instance exists yet.
    pub async fn get_or_create(self: &Arc<Self>, name: &str, args: Args) -> Result<Arc<Resource<C>>, EngineError> {
        self.ensure_open()?;
        let schema = self.schemas.get(name)?;
        if schema.is_detached() {
            return Err(EngineError::Detached { resource: name.to_string() });
        }

        if let Ok(id) = schema.derive_id(&args)
            && let Some(existing) = self.get_resource(name, &id)
        {
            debug!(connection_id = self.connection.id(), resource = %name, id = %id, "resource cache hit");
            return Ok(existing);
        }
        self.create(name, args).await
    }

    /// Build an instance of a detached schema. It gets a unique id and is never registered.
    pub async fn new_detached(self: &Arc<Self>, name: &str, args: Args) -> Result<Arc<Resource<C>>, EngineError> {
        self.ensure_open()?;
        let schema = Arc::clone(self.schemas.get(name)?);
        if !schema.is_detached() {
            return Err(EngineError::NotDetached { resource: name.to_string() });
        }

        let args = match self.initialize(&schema, args).await? {
            InitOutcome::Existing(resource) => return Ok(resource),
            InitOutcome::Args(args) => args,
        };
        let sequence = self.detached_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{name}#{sequence}");
        Ok(Arc::new(Resource::new(schema, id, args, self)))
    }

    pub fn get_resource(&self, name: &str, id: &str) -> Option<Arc<Resource<C>>> {
        self.resources
            .lock()
            .expect("resource registry lock poisoned")
            .get(&(name.to_string(), id.to_string()))
            .cloned()
    }

    pub fn resource(&self, name: &str, id: &str) -> Result<Arc<Resource<C>>, EngineError> {
        self.get_resource(name, id).ok_or_else(|| EngineError::ResourceNotFound {
            resource: name.to_string(),
            id: id.to_string(),
        })
    }

    /// Read one field of a registered instance.
    pub async fn get_data(&self, name: &str, id: &str, field: &str) -> Result<RawData, EngineError> {
        self.resource(name, id)?.get_data(field).await
    }

    /// Seed one field of a registered instance.
    pub fn set_data(&self, name: &str, id: &str, field: &str, data: RawData) -> Result<(), EngineError> {
        self.resource(name, id)?.set_data(field, data)
    }

    /// Every registered instance, ordered by resource name and id.
    pub fn resources(&self) -> Vec<Arc<Resource<C>>> {
        let registry = self.resources.lock().expect("resource registry lock poisoned");
        let mut entries: Vec<(&ResourceKey, &Arc<Resource<C>>)> = registry.iter().collect();
        entries.sort_by(|left, right| left.0.cmp(right.0));
        entries.into_iter().map(|(_, resource)| Arc::clone(resource)).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.lock().expect("resource registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Settled fields of every registered instance.
    pub fn snapshot(&self) -> Vec<ResourceSnapshot> {
        self.resources()
            .into_iter()
            .map(|resource| ResourceSnapshot {
                resource: resource.name().to_string(),
                id: resource.id().to_string(),
                fields: resource.settled_fields(),
            })
            .collect()
    }

    /// Memoize an expensive lookup that is not a resource field, e.g. a listing
    /// several resources are derived from. Failed lookups are retried.
    pub async fn memoize<F, Fut>(&self, key: &str, lookup: F) -> anyhow::Result<(RawData, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<RawData>>,
    {
        self.lookups.memoize(key, lookup).await
    }

    /// Hand a message to the callback. Without a callback the message is dropped.
    pub fn collect(&self, message: CallbackMessage) {
        match &self.callback {
            Some(callback) => callback.collect(self.connection.id(), message),
            None => debug!(connection_id = self.connection.id(), "no callback registered; dropping message"),
        }
    }

    /// Report assets discovered behind this connection.
    pub fn discovered_assets(&self, assets: Vec<Asset>) {
        if !assets.is_empty() {
            self.collect(CallbackMessage::DiscoveredAssets { assets });
        }
    }

    /// Stream an instance and its settled fields to the callback.
    pub fn emit_resource(&self, resource: &Resource<C>) {
        self.collect(CallbackMessage::Resource {
            resource: resource.name().to_string(),
            id: resource.id().to_string(),
            fields: resource.settled_fields(),
        });
    }

    /// Close the connection and drop every instance. Pending field
    /// computations are cancelled and leave their fields unset.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let dropped = {
            let mut registry = self.resources.lock().expect("resource registry lock poisoned");
            let count = registry.len();
            registry.clear();
            count
        };
        self.lookups.flush();
        self.connection.close();
        info!(
            connection_id = self.connection.id(),
            connection = %self.connection.name(),
            dropped_resources = dropped,
            "runtime closed"
        );
    }

    pub(crate) fn record_resolution(&self, resource: &str, id: &str, field: &str, elapsed: Duration, success: bool) {
        self.telemetry.record(TelemetryEvent {
            connection_id: self.connection.id(),
            resource: resource.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            success,
            recorded_at: Utc::now(),
        });
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::RuntimeClosed {
                connection_id: self.connection.id(),
            });
        }
        Ok(())
    }

    async fn initialize(self: &Arc<Self>, schema: &ResourceSchema<C>, args: Args) -> Result<InitOutcome<C>, EngineError> {
        schema.check_args(&args)?;
        let Some(init) = schema.initializer() else {
            return Ok(InitOutcome::Args(args));
        };

        let outcome = init(Arc::clone(self), args).await.map_err(|source| EngineError::Init {
            resource: schema.name().to_string(),
            source,
        })?;
        if let InitOutcome::Args(derived) = &outcome {
            schema.check_args(derived)?;
        }
        Ok(outcome)
    }

    fn register(self: &Arc<Self>, schema: Arc<ResourceSchema<C>>, id: String, args: Args) -> Arc<Resource<C>> {
        let mut registry = self.resources.lock().expect("resource registry lock poisoned");
        let key = (schema.name().to_string(), id);
        if let Some(existing) = registry.get(&key) {
            debug!(connection_id = self.connection.id(), resource = %key.0, id = %key.1, "resource already registered");
            return Arc::clone(existing);
        }

        debug!(connection_id = self.connection.id(), resource = %key.0, id = %key.1, "resource registered");
        let resource = Arc::new(Resource::new(schema, key.1.clone(), args, self));
        registry.insert(key, Arc::clone(&resource));
        resource
    }
}
