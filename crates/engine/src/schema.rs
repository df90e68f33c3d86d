//! Resource type declarations and the per-process schema registry.
//!
//! A [`ResourceSchema`] names a resource type, declares the type of each of its
//! fields, says how an instance derives its identity and registers the
//! optional initializer and per-field resolvers. Schemas are collected into a
//! [`SchemaRegistry`] once at startup and shared read-only with every runtime.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use inquest_types::{RawData, Type, Value};

use crate::connection::Connection;
use crate::error::EngineError;
use crate::resource::Resource;
use crate::runtime::Runtime;

/// Named arguments used to seed a resource instance.
pub type Args = BTreeMap<String, RawData>;

/// Computes one field of a resource instance.
pub type ResolverFn<C> = Arc<dyn Fn(Arc<Runtime<C>>, Arc<Resource<C>>) -> BoxFuture<'static, anyhow::Result<RawData>> + Send + Sync>;

/// Validates seed arguments and derives more of them before an instance exists.
pub type InitFn<C> = Arc<dyn Fn(Arc<Runtime<C>>, Args) -> BoxFuture<'static, anyhow::Result<InitOutcome<C>>> + Send + Sync>;

/// Derives an instance id from seed arguments. Must be free of side effects.
pub type IdFn = Arc<dyn Fn(&Args) -> anyhow::Result<String> + Send + Sync>;

/// Result of running a resource initializer.
pub enum InitOutcome<C: Connection> {
    /// Build a new instance from these arguments.
    Args(Args),
    /// The initializer found the instance itself; use it as-is.
    Existing(Arc<Resource<C>>),
}

/// How instances of a resource type are identified.
#[derive(Clone)]
pub enum Identity {
    /// Id is built from these fields, in order.
    Fields(Vec<String>),
    Custom(IdFn),
    /// One instance per runtime; the id is the resource name.
    Singleton,
    /// Helper objects with no identity; they never enter the registry.
    Detached,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Identity::Custom(_) => f.write_str("Custom(..)"),
            Identity::Singleton => f.write_str("Singleton"),
            Identity::Detached => f.write_str("Detached"),
        }
    }
}

/// Declaration of one resource type.
pub struct ResourceSchema<C: Connection> {
    name: String,
    fields: BTreeMap<String, Type>,
    required: Vec<String>,
    identity: Identity,
    init: Option<InitFn<C>>,
    resolvers: HashMap<String, ResolverFn<C>>,
}

impl<C: Connection> fmt::Debug for ResourceSchema<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSchema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("identity", &self.identity)
            .field("has_init", &self.init.is_some())
            .finish()
    }
}

impl<C: Connection> ResourceSchema<C> {
    /// Start a schema whose instances are identified by `Identity::Singleton`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            required: Vec::new(),
            identity: Identity::Singleton,
            init: None,
            resolvers: HashMap::new(),
        }
    }

    /// Declare a field and its type.
    pub fn field(mut self, name: impl Into<String>, typ: Type) -> Self {
        self.fields.insert(name.into(), typ);
        self
    }

    /// Declare a field that must be present in the seed arguments.
    pub fn required_field(mut self, name: impl Into<String>, typ: Type) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.fields.insert(name, typ);
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Identify instances by the given fields.
    pub fn id_fields<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity(Identity::Fields(fields.into_iter().map(Into::into).collect()))
    }

    pub fn id_fn<F>(self, derive: F) -> Self
    where
        F: Fn(&Args) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.identity(Identity::Custom(Arc::new(derive)))
    }

    pub fn detached(self) -> Self {
        self.identity(Identity::Detached)
    }

    pub fn init<F, Fut>(mut self, init: F) -> Self
    where
        F: Fn(Arc<Runtime<C>>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<InitOutcome<C>>> + Send + 'static,
    {
        self.init = Some(Arc::new(
            move |runtime: Arc<Runtime<C>>, args: Args| -> BoxFuture<'static, anyhow::Result<InitOutcome<C>>> { Box::pin(init(runtime, args)) },
        ));
        self
    }

    /// Register the resolver computing `field`. The field must already be declared.
    pub fn resolver<F, Fut>(mut self, field: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(Arc<Runtime<C>>, Arc<Resource<C>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<RawData>> + Send + 'static,
    {
        let field = field.into();
        assert!(
            self.fields.contains_key(&field),
            "resolver registered for undeclared field '{}.{}'",
            self.name,
            field
        );
        let resolver: ResolverFn<C> = Arc::new(
            move |runtime: Arc<Runtime<C>>, resource: Arc<Resource<C>>| -> BoxFuture<'static, anyhow::Result<RawData>> {
                Box::pin(resolve(runtime, resource))
            },
        );
        self.resolvers.insert(field, resolver);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &BTreeMap<String, Type> {
        &self.fields
    }

    pub fn field_type(&self, field: &str) -> Option<&Type> {
        self.fields.get(field)
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.identity, Identity::Detached)
    }

    pub(crate) fn initializer(&self) -> Option<&InitFn<C>> {
        self.init.as_ref()
    }

    pub(crate) fn resolver_for(&self, field: &str) -> Option<&ResolverFn<C>> {
        self.resolvers.get(field)
    }

    /// Check seed arguments against required fields and declared types.
    pub(crate) fn check_args(&self, args: &Args) -> Result<(), EngineError> {
        for required in &self.required {
            if !args.contains_key(required) {
                return Err(EngineError::MissingArgument {
                    resource: self.name.clone(),
                    argument: required.clone(),
                });
            }
        }
        for (argument, data) in args {
            let declared = self.fields.get(argument).ok_or_else(|| EngineError::UnknownField {
                resource: self.name.clone(),
                field: argument.clone(),
            })?;
            if !accepts(declared, &data.typ) {
                return Err(EngineError::ArgumentType {
                    resource: self.name.clone(),
                    argument: argument.clone(),
                    expected: declared.label(),
                    found: data.typ.label(),
                });
            }
        }
        Ok(())
    }

    /// Derive the instance id from seed arguments.
    pub(crate) fn derive_id(&self, args: &Args) -> Result<String, EngineError> {
        let id = match &self.identity {
            Identity::Singleton => self.name.clone(),
            Identity::Detached => return Err(EngineError::Detached { resource: self.name.clone() }),
            Identity::Custom(derive) => derive(args).map_err(|error| EngineError::identity(&self.name, format!("{error:#}")))?,
            Identity::Fields(fields) => {
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    let data = args
                        .get(field)
                        .ok_or_else(|| EngineError::identity(&self.name, format!("identity field '{field}' is not set")))?;
                    parts.push(id_part(data).ok_or_else(|| {
                        EngineError::identity(&self.name, format!("identity field '{field}' of type {} cannot form an id", data.typ))
                    })?);
                }
                parts.join("/")
            }
        };

        if id.trim().is_empty() {
            return Err(EngineError::identity(&self.name, "derived id is empty"));
        }
        Ok(id)
    }
}

fn id_part(data: &RawData) -> Option<String> {
    match &data.value {
        Value::String(text) => Some(text.clone()),
        Value::Int(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Time(time) => Some(time.timestamp().to_string()),
        Value::Resource(reference) => Some(format!("{}:{}", reference.name, reference.id)),
        _ => None,
    }
}

/// Whether data of type `actual` may be stored in a field declared as `declared`.
pub(crate) fn accepts(declared: &Type, actual: &Type) -> bool {
    if declared == actual || *declared == Type::ANY || *actual == Type::NIL {
        return true;
    }
    if (declared.is_array() && actual.is_array()) || (declared.is_map() && actual.is_map() && declared.key() == actual.key()) {
        return match (declared.child(), actual.child()) {
            (Some(declared_child), Some(actual_child)) => accepts(&declared_child, &actual_child),
            _ => false,
        };
    }
    let (_, compatible) = Type::enforce(declared, actual);
    compatible
}

/// Every resource type a provider serves.
pub struct SchemaRegistry<C: Connection> {
    schemas: HashMap<String, Arc<ResourceSchema<C>>>,
}

impl<C: Connection> Default for SchemaRegistry<C> {
    fn default() -> Self {
        Self { schemas: HashMap::new() }
    }
}

impl<C: Connection> fmt::Debug for SchemaRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.schemas.keys().collect();
        names.sort();
        f.debug_struct("SchemaRegistry").field("resources", &names).finish()
    }
}

impl<C: Connection> SchemaRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schema. Registering the same name twice replaces the earlier schema.
    pub fn register(mut self, schema: ResourceSchema<C>) -> Self {
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
        self
    }

    pub fn get(&self, name: &str) -> Result<&Arc<ResourceSchema<C>>, EngineError> {
        self.schemas.get(name).ok_or_else(|| EngineError::unknown_resource(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoConnection;

    impl Connection for NoConnection {
        fn id(&self) -> u32 {
            0
        }

        fn name(&self) -> &str {
            "none"
        }
    }

    fn args(pairs: &[(&str, RawData)]) -> Args {
        pairs.iter().map(|(name, data)| (name.to_string(), data.clone())).collect()
    }

    #[test]
    fn ids_join_identity_fields() {
        let schema = ResourceSchema::<NoConnection>::new("k8s.pod")
            .field("namespace", Type::STRING)
            .field("name", Type::STRING)
            .id_fields(["namespace", "name"]);

        let id = schema
            .derive_id(&args(&[("namespace", RawData::string("default")), ("name", RawData::string("web-0"))]))
            .expect("id");
        assert_eq!(id, "default/web-0");
    }

    #[test]
    fn empty_or_missing_identity_is_rejected() {
        let schema = ResourceSchema::<NoConnection>::new("user").field("name", Type::STRING).id_fields(["name"]);

        assert!(matches!(schema.derive_id(&Args::new()), Err(EngineError::Identity { .. })));
        assert!(matches!(
            schema.derive_id(&args(&[("name", RawData::string(" "))])),
            Err(EngineError::Identity { .. })
        ));
    }

    #[test]
    fn argument_types_are_checked() {
        let schema = ResourceSchema::<NoConnection>::new("file")
            .required_field("path", Type::STRING)
            .field("size", Type::INT);

        assert!(matches!(schema.check_args(&Args::new()), Err(EngineError::MissingArgument { .. })));
        assert!(matches!(
            schema.check_args(&args(&[("path", RawData::int(3))])),
            Err(EngineError::ArgumentType { .. })
        ));
        assert!(matches!(
            schema.check_args(&args(&[("path", RawData::string("/etc")), ("mode", RawData::int(1))])),
            Err(EngineError::UnknownField { .. })
        ));
        assert!(schema.check_args(&args(&[("path", RawData::string("/etc")), ("size", RawData::nil())])).is_ok());
    }

    #[test]
    fn compatibility_follows_type_enforcement() {
        assert!(accepts(&Type::ANY, &Type::STRING));
        assert!(accepts(&Type::array(&Type::ANY), &Type::array(&Type::resource("user"))));
        assert!(!accepts(&Type::STRING, &Type::INT));
        assert!(!accepts(&Type::array(&Type::INT), &Type::array(&Type::STRING)));
    }

    #[test]
    #[should_panic(expected = "undeclared field")]
    fn resolvers_need_declared_fields() {
        let _schema = ResourceSchema::<NoConnection>::new("os").resolver("name", |_runtime, _resource| async { Ok(RawData::string("linux")) });
    }
}
