//! Descriptors of the systems being inspected and how to reach them.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A system under inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Stable identifier assigned by the inventory, if any
    #[serde(default)]
    pub id: String,
    /// Human-readable name (e.g., "build-host-01")
    #[serde(default)]
    pub name: String,
    /// Detected or declared platform; `None` until detection ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Platform identifiers discovered for this asset
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platform_ids: Vec<String>,
    /// Ways to reach the asset; the first entry is used when connecting
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Asset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Platform facts about an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Short platform name (e.g., "ubuntu", "aws", "k8s-cluster")
    pub name: String,
    #[serde(default)]
    pub title: String,
    /// Platform families from most to least specific (e.g., ["debian", "linux", "unix"])
    #[serde(default)]
    pub family: Vec<String>,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub arch: String,
}

/// Describes how to reach an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connector name understood by the provider (e.g., "ssh", "local", "k8s")
    pub connector: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<Credential>,
    /// Connector-specific options; ordered so the fingerprint is stable
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    /// Identifier assigned once the connection is established
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
}

impl ConnectionConfig {
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            ..Self::default()
        }
    }

    /// Content hash used to share one runtime between identical connection requests.
    ///
    /// The assigned connection id is not part of the fingerprint.
    pub fn fingerprint(&self) -> u64 {
        let mut normalized = self.clone();
        normalized.id = None;
        let serialized = serde_json::to_string(&normalized).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        serialized.hash(&mut hasher);
        hasher.finish()
    }
}

/// Supported credential kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    #[default]
    Password,
    PrivateKey,
    Token,
    AwsEc2InstanceConnect,
}

/// A secret used to authenticate a connection.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub kind: CredentialKind,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub secret: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}
