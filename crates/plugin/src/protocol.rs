//! Newline-delimited JSON frames exchanged between the orchestrator and a provider process.
//!
//! Every line on the provider's stdin or stdout is one [`Frame`]. Requests
//! carry an id chosen by the orchestrator; the provider answers each with a
//! response frame carrying the same id, in completion order. Callback frames
//! flow from the provider at any time while a connection is open.

use std::path::PathBuf;

use inquest_engine::{Args, CallbackMessage, ResourceSnapshot};
use inquest_types::{Asset, ResourceRef, UpstreamConfig};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::provider::ParseCliRequest;
use crate::recording::Recording;

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    Request {
        id: u64,
        body: Request,
    },
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Callback {
        connection: u32,
        message: CallbackMessage,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Operations a provider process answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum Request {
    ParseCli(ParseCliRequest),
    Connect(ConnectRequest),
    MockConnect(MockConnectRequest),
    Disconnect(DisconnectRequest),
    GetData(GetDataRequest),
    StoreData(StoreDataRequest),
    Shutdown,
    /// Liveness check; answered with the provider descriptor.
    Heartbeat,
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::ParseCli(_) => "parseCli",
            Request::Connect(_) => "connect",
            Request::MockConnect(_) => "mockConnect",
            Request::Disconnect(_) => "disconnect",
            Request::GetData(_) => "getData",
            Request::StoreData(_) => "storeData",
            Request::Shutdown => "shutdown",
            Request::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseCliResponse {
    pub asset: Asset,
}

/// Open (or reuse) a connection to the first connection config of `asset`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub asset: Asset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub id: u32,
    pub name: String,
    pub asset: Asset,
}

/// Where a replayed connection gets its data from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingSource {
    Path(PathBuf),
    Inline(Recording),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConnectRequest {
    pub asset: Asset,
    pub recording: RecordingSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub connection: u32,
}

/// Read one field of a resource, creating the resource from `args` if needed.
///
/// Without a field, the response carries a reference to the resource itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDataRequest {
    pub connection: u32,
    pub resource: String,
    #[serde(default)]
    pub args: Args,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Push pre-computed resources into a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDataRequest {
    pub connection: u32,
    pub resources: Vec<ResourceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDataResponse {
    pub stored: Vec<ResourceRef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use inquest_types::{FieldResult, RawData};
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_method() {
        let frame = Frame::Request {
            id: 3,
            body: Request::Disconnect(DisconnectRequest { connection: 2 }),
        };
        let encoded = serde_json::to_value(&frame).expect("encode");
        assert_eq!(
            encoded,
            json!({"type": "request", "id": 3, "body": {"method": "disconnect", "params": {"connection": 2}}})
        );

        let heartbeat = serde_json::to_value(Request::Heartbeat).expect("encode");
        assert_eq!(heartbeat, json!({"method": "heartbeat"}));
    }

    #[test]
    fn get_data_carries_typed_arguments() {
        let line = r#"{"type":"request","id":9,"body":{"method":"getData","params":{"connection":1,"resource":"user","args":{"name":{"type":"\u0007","value":"root"}},"field":"home"}}}"#;
        let Frame::Request { id, body } = Frame::decode(line).expect("decode") else {
            panic!("expected a request frame");
        };
        assert_eq!(id, 9);
        let Request::GetData(request) = body else {
            panic!("expected getData");
        };
        assert_eq!(request.args.get("name"), Some(&RawData::string("root")));
        assert_eq!(request.field.as_deref(), Some("home"));
    }

    #[test]
    fn frames_end_with_a_newline() {
        let frame = Frame::Response {
            id: 1,
            result: Some(serde_json::to_value(FieldResult::Error { error: "boom".into() }).expect("encode")),
            error: None,
        };
        let line = frame.encode().expect("encode");
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|byte| **byte == b'\n').count(), 1);
        assert_eq!(Frame::decode(std::str::from_utf8(&line).expect("utf8")).expect("decode"), frame);
    }
}
