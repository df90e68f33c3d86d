//! Resource instances and their per-field memoization.
//!
//! Every declared field owns one cell that transitions exactly once, from
//! unset to a terminal [`TValue`]. The first reader of an unset field runs its
//! resolver as a separate task; concurrent readers wait on the same cell and
//! observe the identical value or error. Cancelling the reader before the
//! resolver finishes aborts the task and leaves the cell unset.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use inquest_types::{FieldResult, RawData, ResourceRef, Type};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::EngineError;
use crate::runtime::Runtime;
use crate::schema::{Args, ResourceSchema, accepts};
use crate::tvalue::{FieldError, State, TValue};

/// Typed handle to a private, lazily computed object cached on an instance.
///
/// Declare keys as constants next to the resolvers that share them:
///
/// ```
/// use inquest_engine::PrivateKey;
///
/// struct Release {
///     version: String,
/// }
///
/// const RELEASE: PrivateKey<Release> = PrivateKey::new("release");
/// ```
pub struct PrivateKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PrivateKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

type PrivateSlots = HashMap<(&'static str, TypeId), Arc<dyn Any + Send + Sync>>;

/// Aborts the resolver task when the waiting caller goes away.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One instance of a resource type, owned by a single runtime.
pub struct Resource<C: Connection> {
    schema: Arc<ResourceSchema<C>>,
    id: String,
    fields: BTreeMap<String, OnceCell<TValue<RawData>>>,
    private: Mutex<PrivateSlots>,
    connection_id: u32,
    runtime: Weak<Runtime<C>>,
}

impl<C: Connection> fmt::Debug for Resource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled: Vec<&String> = self
            .fields
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name)
            .collect();
        f.debug_struct("Resource")
            .field("name", &self.schema.name())
            .field("id", &self.id)
            .field("settled_fields", &settled)
            .finish()
    }
}

impl<C: Connection> Resource<C> {
    /// Build an instance with every argument already terminal. Arguments must
    /// have been checked against the schema.
    pub(crate) fn new(schema: Arc<ResourceSchema<C>>, id: String, args: Args, runtime: &Arc<Runtime<C>>) -> Self {
        let mut args = args;
        let fields = schema
            .fields()
            .iter()
            .map(|(name, declared)| {
                let cell = match args.remove(name) {
                    Some(data) => OnceCell::new_with(Some(settled(declared, data))),
                    None => OnceCell::new(),
                };
                (name.clone(), cell)
            })
            .collect();

        Self {
            schema,
            id,
            fields,
            private: Mutex::new(HashMap::new()),
            connection_id: runtime.connection().id(),
            runtime: Arc::downgrade(runtime),
        }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &ResourceSchema<C> {
        &self.schema
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.name(), self.id.clone())
    }

    /// This instance as a resource-typed value, for use as another field's data.
    pub fn to_raw_data(&self) -> RawData {
        RawData::resource(self.reference())
    }

    /// Current state of `field` without triggering computation.
    pub fn field_state(&self, field: &str) -> Option<State> {
        let cell = self.fields.get(field)?;
        Some(cell.get().map(|value| value.state).unwrap_or(State::UNSET))
    }

    /// Terminal value of `field` if it has been computed already.
    pub fn cached(&self, field: &str) -> Option<TValue<RawData>> {
        self.fields.get(field)?.get().cloned()
    }

    /// Read `field`, computing it on first access.
    ///
    /// A failed field is returned as [`EngineError::Field`]; reading it again
    /// yields the same recorded error without re-running the resolver.
    pub async fn get_data(self: &Arc<Self>, field: &str) -> Result<RawData, EngineError> {
        let value = self.get_value(field).await?;
        value.into_result().map_err(|source| EngineError::Field {
            resource: self.name().to_string(),
            id: self.id.clone(),
            field: field.to_string(),
            source,
        })
    }

    /// Read the terminal [`TValue`] of `field`, computing it on first access.
    pub async fn get_value(self: &Arc<Self>, field: &str) -> Result<TValue<RawData>, EngineError> {
        let runtime = self.runtime()?;
        let cancel = runtime.cancellation_token().clone();
        self.get_value_with(field, &cancel).await
    }

    /// Like [`Resource::get_value`], abandoning the computation when `cancel` fires.
    pub async fn get_value_with(self: &Arc<Self>, field: &str, cancel: &CancellationToken) -> Result<TValue<RawData>, EngineError> {
        let cell = self.cell(field)?;
        if let Some(value) = cell.get() {
            return Ok(value.clone());
        }

        let runtime = self.runtime()?;
        let declared = self.declared(field)?;
        cell.get_or_try_init(|| self.resolve(runtime, field, declared, cancel))
            .await
            .cloned()
    }

    /// Seed `field` before it is read.
    ///
    /// Fails when the field already reached a terminal state or the data does
    /// not match the declared type.
    pub fn set_data(&self, field: &str, data: RawData) -> Result<(), EngineError> {
        let declared = self.declared(field)?;
        if !accepts(declared, &data.typ) {
            return Err(EngineError::ArgumentType {
                resource: self.name().to_string(),
                argument: field.to_string(),
                expected: declared.label(),
                found: data.typ.label(),
            });
        }
        self.settle(field, settled(declared, data))
    }

    /// Record a failure for `field` before it is read.
    pub fn set_error(&self, field: &str, error: anyhow::Error) -> Result<(), EngineError> {
        let declared = self.declared(field)?;
        self.settle(field, TValue::failed(RawData::null(declared.clone()), FieldError::new(error)))
    }

    /// Every field that reached a terminal state.
    pub fn settled_fields(&self) -> BTreeMap<String, FieldResult> {
        self.fields
            .iter()
            .filter_map(|(name, cell)| {
                let value = cell.get()?;
                let result = match &value.error {
                    Some(error) => FieldResult::Error { error: error.to_string() },
                    None => FieldResult::Data(value.data.clone()),
                };
                Some((name.clone(), result))
            })
            .collect()
    }

    /// Return the private object for `key`, computing it with `init` once.
    ///
    /// Concurrent callers share one computation. A failed computation is not
    /// kept, so the next caller retries.
    pub async fn private<T, F, Fut, E>(&self, key: &PrivateKey<T>, init: F) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slot = self.private_slot(key);
        slot.get_or_try_init(|| async move { init().await.map(Arc::new) }).await.cloned()
    }

    /// Store a private object. Returns `false` when one was already stored.
    pub fn set_private<T: Send + Sync + 'static>(&self, key: &PrivateKey<T>, value: T) -> bool {
        self.private_slot(key).set(Arc::new(value)).is_ok()
    }

    pub fn get_private<T: Send + Sync + 'static>(&self, key: &PrivateKey<T>) -> Option<Arc<T>> {
        self.private_slot(key).get().cloned()
    }

    fn private_slot<T: Send + Sync + 'static>(&self, key: &PrivateKey<T>) -> Arc<OnceCell<Arc<T>>> {
        let mut slots = self.private.lock().expect("private cache lock poisoned");
        let slot = slots
            .entry((key.name, TypeId::of::<T>()))
            .or_insert_with(|| Arc::new(OnceCell::<Arc<T>>::new()) as Arc<dyn Any + Send + Sync>)
            .clone();
        slot.downcast::<OnceCell<Arc<T>>>()
            .expect("private slots are keyed by their value type")
    }

    fn runtime(&self) -> Result<Arc<Runtime<C>>, EngineError> {
        self.runtime.upgrade().ok_or(EngineError::RuntimeClosed {
            connection_id: self.connection_id,
        })
    }

    fn cell(&self, field: &str) -> Result<&OnceCell<TValue<RawData>>, EngineError> {
        self.fields.get(field).ok_or_else(|| EngineError::UnknownField {
            resource: self.name().to_string(),
            field: field.to_string(),
        })
    }

    fn declared(&self, field: &str) -> Result<&Type, EngineError> {
        self.schema.field_type(field).ok_or_else(|| EngineError::UnknownField {
            resource: self.name().to_string(),
            field: field.to_string(),
        })
    }

    fn settle(&self, field: &str, value: TValue<RawData>) -> Result<(), EngineError> {
        self.cell(field)?.set(value).map_err(|_| EngineError::AlreadySet {
            resource: self.name().to_string(),
            id: self.id.clone(),
            field: field.to_string(),
        })
    }

    async fn resolve(
        self: &Arc<Self>,
        runtime: Arc<Runtime<C>>,
        field: &str,
        declared: &Type,
        cancel: &CancellationToken,
    ) -> Result<TValue<RawData>, EngineError> {
        let Some(resolver) = self.schema.resolver_for(field).cloned() else {
            debug!(resource = %self.name(), id = %self.id, field, "field has no resolver; storing null");
            return Ok(TValue::null(RawData::null(declared.clone())));
        };

        let cancelled = || EngineError::Cancelled {
            resource: self.name().to_string(),
            id: self.id.clone(),
            field: field.to_string(),
        };

        let started = Instant::now();
        let mut task = AbortOnDrop(tokio::spawn(resolver(Arc::clone(&runtime), Arc::clone(self))));
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(resource = %self.name(), id = %self.id, field, "field resolution cancelled");
                return Err(cancelled());
            }
            joined = &mut task.0 => joined,
        };

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(_) => return Err(cancelled()),
        };

        let value = match outcome {
            Ok(data) => {
                if !accepts(declared, &data.typ) {
                    panic!(
                        "resolver for {}.{} returned {} but the field is declared as {}",
                        self.name(),
                        field,
                        data.typ.label(),
                        declared.label()
                    );
                }
                settled(declared, data)
            }
            Err(error) => {
                warn!(resource = %self.name(), id = %self.id, field, error = %format!("{error:#}"), "field resolution failed");
                TValue::failed(RawData::null(declared.clone()), FieldError::new(error))
            }
        };

        runtime.record_resolution(self.name(), &self.id, field, started.elapsed(), value.error.is_none());
        Ok(value)
    }
}

/// Terminal value for data stored in a field declared as `declared`.
fn settled(declared: &Type, data: RawData) -> TValue<RawData> {
    if data.is_null() {
        TValue::null(RawData::null(declared.clone()))
    } else {
        TValue::set(data)
    }
}
