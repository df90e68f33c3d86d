use std::fmt;

use serde::{Deserialize, Serialize};

/// Optional remote service that receives resource telemetry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Base URL of the service (e.g., "https://upstream.example.com")
    pub endpoint: String,
    /// Identifier of the space resources are reported into
    #[serde(default)]
    pub space_mrn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Request timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl UpstreamConfig {
    pub fn is_enabled(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("endpoint", &self.endpoint)
            .field("space_mrn", &self.space_mrn)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
