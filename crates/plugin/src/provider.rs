//! The contract a provider implements, plus the descriptor it advertises.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use inquest_engine::{Connection, SchemaRegistry};
use inquest_types::{Asset, ConnectionConfig, Credential, CredentialKind, Platform};
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Optional behaviours a provider opts into when it registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Can serve connections from recordings instead of a live target.
    Replay,
    /// Reports assets found behind a connection.
    Discovery,
    /// Accepts pre-computed resources pushed by the orchestrator.
    Store,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Replay => f.write_str("replay"),
            Capability::Discovery => f.write_str("discovery"),
            Capability::Store => f.write_str("store"),
        }
    }
}

/// Value kind of a connector flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlagKind {
    #[default]
    String,
    Bool,
    Int,
    List,
}

/// A command-line flag accepted by a connector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDescriptor {
    /// Long flag name without dashes (e.g., "identity-file")
    pub long: String,
    #[serde(default)]
    pub kind: FlagKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl FlagDescriptor {
    pub fn new(long: impl Into<String>, kind: FlagKind, description: impl Into<String>) -> Self {
        Self {
            long: long.into(),
            kind,
            description: description.into(),
            ..Self::default()
        }
    }
}

/// A way of reaching targets offered by a provider (e.g., "ssh", "local").
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDescriptor {
    pub name: String,
    /// Usage line (e.g., "ssh user@host")
    #[serde(default, rename = "use")]
    pub usage: String,
    #[serde(default)]
    pub short: String,
    #[serde(default)]
    pub min_args: usize,
    #[serde(default)]
    pub max_args: usize,
    #[serde(default)]
    pub flags: Vec<FlagDescriptor>,
}

/// Everything the orchestrator needs to know about a provider before using it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub connectors: Vec<ConnectorDescriptor>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl ProviderDescriptor {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn connector(&self, name: &str) -> Option<&ConnectorDescriptor> {
        self.connectors.iter().find(|connector| connector.name == name)
    }
}

/// Command-line shaped input for a connector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseCliRequest {
    pub connector: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
}

/// Platform identity established while connecting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub platform: Platform,
    #[serde(default)]
    pub platform_ids: Vec<String>,
}

/// A technology-specific backend serving resources over one or more connectors.
///
/// Everything a provider needs is registered up front: its descriptor and the
/// schema registry shared by every runtime it creates.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    type Connection: Connection;

    fn descriptor(&self) -> ProviderDescriptor;

    fn schemas(&self) -> Arc<SchemaRegistry<Self::Connection>>;

    /// Turn command-line input into an asset with one connection. Must not
    /// perform network I/O.
    ///
    /// The default treats the first argument as `[user@]host[:port]`, maps the
    /// `password`, `identity-file` and `token` flags to credentials and keeps
    /// every other flag as a connection option.
    fn parse_cli(&self, request: &ParseCliRequest) -> Result<Asset, PluginError> {
        default_parse_cli(request)
    }

    /// Open a connection to the target described by `config`. The returned
    /// connection must report `id` from [`Connection::id`].
    async fn connect(&self, id: u32, config: &ConnectionConfig, asset: &Asset) -> anyhow::Result<Self::Connection>;

    /// Establish platform identity for a freshly connected asset.
    async fn detect(&self, connection: &Self::Connection, asset: &Asset) -> anyhow::Result<Detection>;

    /// Build a connection that never reaches a live target, for replaying a recording.
    async fn mock_connect(&self, _id: u32, _config: &ConnectionConfig, _asset: &Asset) -> anyhow::Result<Self::Connection> {
        Err(anyhow!("replay is not supported by this provider"))
    }
}

fn flag_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn default_parse_cli(request: &ParseCliRequest) -> Result<Asset, PluginError> {
    let mut config = ConnectionConfig::new(request.connector.clone());

    if let Some(target) = request.args.first() {
        let (user, host_port) = match target.split_once('@') {
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, target.as_str()),
        };
        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| PluginError::configuration(format!("invalid port '{port}' in target '{target}'")))?;
                (host.to_string(), port)
            }
            None => (host_port.to_string(), 0),
        };
        if host.is_empty() {
            return Err(PluginError::configuration(format!("target '{target}' has no host")));
        }
        config.host = host;
        config.port = port;
        if let Some(user) = user {
            config.credentials.push(Credential {
                kind: CredentialKind::Password,
                user,
                secret: String::new(),
            });
        }
    }

    for (flag, value) in &request.flags {
        let text = flag_text(value);
        match flag.as_str() {
            "password" => {
                let user = config.credentials.first().map(|credential| credential.user.clone()).unwrap_or_default();
                match config
                    .credentials
                    .iter_mut()
                    .find(|credential| credential.kind == CredentialKind::Password)
                {
                    Some(credential) => credential.secret = text,
                    None => config.credentials.push(Credential {
                        kind: CredentialKind::Password,
                        user,
                        secret: text,
                    }),
                }
            }
            "identity-file" => config.credentials.push(Credential {
                kind: CredentialKind::PrivateKey,
                user: config.credentials.first().map(|credential| credential.user.clone()).unwrap_or_default(),
                secret: text,
            }),
            "token" => config.credentials.push(Credential {
                kind: CredentialKind::Token,
                user: String::new(),
                secret: text,
            }),
            "insecure" => config.insecure = matches!(value, serde_json::Value::Bool(true)) || text == "true",
            "path" => config.path = text,
            _ => {
                config.options.insert(flag.clone(), text);
            }
        }
    }

    let name = if config.host.is_empty() {
        request.connector.clone()
    } else {
        config.host.clone()
    };
    Ok(Asset {
        name,
        connections: vec![config],
        ..Asset::default()
    })
}

/// Check arguments and flags against the connector declaration.
pub(crate) fn check_cli(provider: &ProviderDescriptor, request: &ParseCliRequest) -> Result<(), PluginError> {
    let connector = provider.connector(&request.connector).ok_or_else(|| PluginError::UnknownConnector {
        provider: provider.id.clone(),
        connector: request.connector.clone(),
    })?;

    let count = request.args.len();
    if count < connector.min_args || (connector.max_args > 0 && count > connector.max_args) {
        return Err(PluginError::configuration(format!(
            "connector '{}' expects between {} and {} arguments, got {count}",
            connector.name, connector.min_args, connector.max_args
        )));
    }

    for flag in &connector.flags {
        if flag.required && !request.flags.contains_key(&flag.long) {
            return Err(PluginError::configuration(format!("missing required flag --{}", flag.long)));
        }
    }
    for (name, value) in &request.flags {
        let declared = connector
            .flags
            .iter()
            .find(|flag| &flag.long == name)
            .ok_or_else(|| PluginError::configuration(format!("unknown flag --{name} for connector '{}'", connector.name)))?;
        let valid = match declared.kind {
            FlagKind::String => value.is_string(),
            FlagKind::Bool => value.is_boolean(),
            FlagKind::Int => value.is_i64() || value.is_u64(),
            FlagKind::List => value.is_array() || value.is_string(),
        };
        if !valid {
            return Err(PluginError::configuration(format!("flag --{name} has the wrong type")));
        }
    }
    Ok(())
}
