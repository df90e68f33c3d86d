//! Auxiliary results streamed to the orchestrator while a query runs.

use std::collections::BTreeMap;

use inquest_types::{Asset, FieldResult};
use serde::{Deserialize, Serialize};

/// Message pushed from a runtime to whoever launched the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CallbackMessage {
    /// Assets discovered behind the current connection (e.g., pods in a cluster).
    #[serde(rename_all = "camelCase")]
    DiscoveredAssets { assets: Vec<Asset> },

    /// A resource and its resolved fields.
    #[serde(rename_all = "camelCase")]
    Resource {
        resource: String,
        id: String,
        fields: BTreeMap<String, FieldResult>,
    },

    /// Free-form progress note.
    #[serde(rename_all = "camelCase")]
    Log { message: String },
}

/// Sink for [`CallbackMessage`]s.
///
/// Delivery is fire-and-forget: implementations must return promptly and
/// drop messages rather than block the resolver that produced them.
pub trait ProviderCallback: Send + Sync {
    fn collect(&self, connection_id: u32, message: CallbackMessage);
}
