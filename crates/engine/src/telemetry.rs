//! Field resolution telemetry and the optional upstream reporter.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use inquest_types::UpstreamConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);
const UPSTREAM_QUEUE_CAPACITY: usize = 512;

/// One field resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub connection_id: u32,
    pub resource: String,
    pub id: String,
    pub field: String,
    pub duration_ms: u64,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Receives telemetry events. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Writes telemetry as debug-level tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: TelemetryEvent) {
        debug!(
            connection_id = event.connection_id,
            resource = %event.resource,
            id = %event.id,
            field = %event.field,
            duration_ms = event.duration_ms,
            success = event.success,
            "field resolved"
        );
    }
}

/// Posts telemetry events to an upstream service from a background task.
///
/// Events are queued and dropped when the queue is full or the service is
/// unreachable; reporting never slows field resolution down.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    sender: mpsc::Sender<TelemetryEvent>,
}

impl HttpUpstream {
    /// Start the reporter. Must be called from within a Tokio runtime.
    pub fn spawn(config: &UpstreamConfig) -> Result<Self> {
        let timeout = config.timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_UPSTREAM_TIMEOUT);
        let http = Client::builder().timeout(timeout).build().context("build upstream http client")?;
        let url = format!(
            "{}/api/v1/spaces/{}/telemetry",
            config.endpoint.trim_end_matches('/'),
            config.space_mrn.trim_start_matches('/')
        );
        let (sender, receiver) = mpsc::channel(UPSTREAM_QUEUE_CAPACITY);
        tokio::spawn(post_events(http, url, config.api_key.clone(), receiver));
        Ok(Self { sender })
    }
}

impl TelemetrySink for HttpUpstream {
    fn record(&self, event: TelemetryEvent) {
        if let Err(error) = self.sender.try_send(event) {
            debug!(error = %error, "dropping upstream telemetry event");
        }
    }
}

async fn post_events(http: Client, url: String, api_key: Option<String>, mut receiver: mpsc::Receiver<TelemetryEvent>) {
    while let Some(event) = receiver.recv().await {
        let mut request = http.post(&url).json(&event);
        if let Some(api_key) = &api_key {
            request = request.bearer_auth(api_key);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!(status = %response.status(), url = %url, "upstream rejected telemetry"),
            Err(error) => warn!(error = %error, url = %url, "failed to send telemetry upstream"),
        }
    }
    debug!(url = %url, "upstream telemetry reporter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> TelemetryEvent {
        TelemetryEvent {
            connection_id: 1,
            resource: "os".into(),
            id: "os".into(),
            field: "name".into(),
            duration_ms: 3,
            success: true,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn http_upstream_posts_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/spaces/space-1/telemetry"))
            .and(bearer_token("secret-key"))
            .and(body_partial_json(serde_json::json!({"resource": "os", "field": "name", "success": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let upstream = HttpUpstream::spawn(&UpstreamConfig {
            endpoint: server.uri(),
            space_mrn: "space-1".into(),
            api_key: Some("secret-key".into()),
            timeout_ms: Some(2_000),
        })
        .expect("spawn upstream");
        upstream.record(event());

        let mut delivered = false;
        for _ in 0..50 {
            if server.received_requests().await.is_some_and(|requests| !requests.is_empty()) {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered, "telemetry event was not delivered");
    }

    #[test]
    fn events_serialize_in_camel_case() {
        let encoded = serde_json::to_value(event()).expect("encode");
        assert_eq!(encoded["connectionId"], 1);
        assert_eq!(encoded["durationMs"], 3);
    }
}
