//! Error types for provider plugins.

use inquest_engine::EngineError;
use thiserror::Error;

use crate::provider::Capability;

/// Errors surfaced by the plugin service and the orchestrator-side client.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Malformed CLI input or connection options.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The target could not be reached or authenticated.
    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("connection {connection_id} not found")]
    NotFound { connection_id: u32 },

    #[error("provider '{provider}' does not support connector '{connector}'")]
    UnknownConnector { provider: String, connector: String },

    #[error("provider '{provider}' does not support {capability}")]
    Unsupported { provider: String, capability: Capability },

    #[error("provider '{provider}' is already starting")]
    Starting { provider: String },

    #[error("recording error: {message}")]
    Recording { message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Error reported by the provider process.
    #[error("provider '{provider}' failed: {message}")]
    Remote { provider: String, message: String },
}

impl PluginError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn connection(error: anyhow::Error) -> Self {
        Self::Connection {
            message: format!("{error:#}"),
        }
    }

    pub fn recording(message: impl Into<String>) -> Self {
        Self::Recording { message: message.into() }
    }
}

/// Errors of the newline-delimited JSON transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("provider '{provider}' closed the connection")]
    Closed { provider: String },

    #[error("unexpected frame: {message}")]
    Unexpected { message: String },
}
