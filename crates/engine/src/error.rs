use thiserror::Error;

use crate::tvalue::FieldError;

/// Errors raised by the resource runtime.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("resource '{name}' is not registered")]
    UnknownResource { name: String },

    #[error("resource '{resource}' has no field '{field}'")]
    UnknownField { resource: String, field: String },

    #[error("no '{resource}' resource with id '{id}'")]
    ResourceNotFound { resource: String, id: String },

    #[error("missing required argument '{argument}' for resource '{resource}'")]
    MissingArgument { resource: String, argument: String },

    #[error("argument '{argument}' of resource '{resource}' must be {expected}, got {found}")]
    ArgumentType {
        resource: String,
        argument: String,
        expected: String,
        found: String,
    },

    #[error("cannot derive an identity for resource '{resource}': {reason}")]
    Identity { resource: String, reason: String },

    #[error("initializing resource '{resource}' failed: {source:#}")]
    Init {
        resource: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("resource '{resource}' is detached and must be built with new_detached")]
    Detached { resource: String },

    #[error("resource '{resource}' has an identity and must be created through the registry")]
    NotDetached { resource: String },

    #[error("field '{field}' of {resource} '{id}' is already set")]
    AlreadySet { resource: String, id: String, field: String },

    #[error("computing '{field}' of {resource} '{id}' was cancelled")]
    Cancelled { resource: String, id: String, field: String },

    #[error("field '{field}' of {resource} '{id}' failed: {source}")]
    Field {
        resource: String,
        id: String,
        field: String,
        #[source]
        source: FieldError,
    },

    #[error("runtime for connection {connection_id} is closed")]
    RuntimeClosed { connection_id: u32 },
}

impl EngineError {
    pub fn unknown_resource(name: &str) -> Self {
        Self::UnknownResource { name: name.to_string() }
    }

    pub fn identity(resource: &str, reason: impl Into<String>) -> Self {
        Self::Identity {
            resource: resource.to_string(),
            reason: reason.into(),
        }
    }

    /// The recorded field error, when this error came from a failed field.
    pub fn field_error(&self) -> Option<&FieldError> {
        match self {
            Self::Field { source, .. } => Some(source),
            _ => None,
        }
    }
}
