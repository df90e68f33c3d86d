//! Orchestrator-side handle to one provider process.

mod manager;
mod stdio;

pub use manager::ProviderManager;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inquest_engine::{ProviderCallback, ResourceSnapshot};
use inquest_types::{Asset, FieldResult, RawData};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::DEFAULT_TIMEOUT_SECONDS;
use crate::error::{PluginError, ProtocolError};
use crate::protocol::{
    ConnectRequest, ConnectResponse, DisconnectRequest, Frame, GetDataRequest, MockConnectRequest, ParseCliResponse, Request,
    StoreDataRequest, StoreDataResponse,
};
use crate::provider::{ParseCliRequest, ProviderDescriptor};

type Reply = Result<serde_json::Value, PluginError>;

/// Outstanding requests; `None` once the provider closed its output.
type Pending = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Reply>>>>>;

/// Timeouts applied by a [`ProviderClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// How long the provider may take to answer the first heartbeat.
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

/// Speaks the wire protocol with one provider.
///
/// Requests may be issued concurrently from any number of tasks; responses
/// are matched to their requests by id.
pub struct ProviderClient {
    name: String,
    descriptor: ProviderDescriptor,
    options: ClientOptions,
    outgoing: mpsc::Sender<Frame>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("name", &self.name)
            .field("provider", &self.descriptor.id)
            .field("version", &self.descriptor.version)
            .finish()
    }
}

impl ProviderClient {
    /// Attach to a provider reachable through `reader`/`writer` and perform
    /// the startup handshake.
    pub async fn connect_io<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        options: ClientOptions,
        callback: Option<Arc<dyn ProviderCallback>>,
    ) -> Result<Self, PluginError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let (outgoing, frames) = mpsc::channel(256);

        let reader = tokio::spawn(read_frames(name.clone(), reader, Arc::clone(&pending), callback));
        let writer = tokio::spawn(write_frames(name.clone(), writer, frames));

        let mut client = Self {
            name,
            descriptor: ProviderDescriptor::default(),
            options,
            outgoing,
            pending,
            next_id: AtomicU64::new(0),
            reader,
            writer,
            child: Mutex::new(None),
        };

        client.descriptor = client
            .request_within(Request::Heartbeat, options.startup_timeout)
            .await
            .inspect_err(|error| warn!(provider = %client.name, error = %error, "provider handshake failed"))?;
        debug!(
            provider = %client.name,
            id = %client.descriptor.id,
            version = %client.descriptor.version,
            "provider handshake complete"
        );
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor reported during the handshake.
    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub async fn heartbeat(&self) -> Result<ProviderDescriptor, PluginError> {
        self.request(Request::Heartbeat).await
    }

    pub async fn parse_cli(&self, request: ParseCliRequest) -> Result<Asset, PluginError> {
        let response: ParseCliResponse = self.request(Request::ParseCli(request)).await?;
        Ok(response.asset)
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<ConnectResponse, PluginError> {
        self.request(Request::Connect(request)).await
    }

    pub async fn mock_connect(&self, request: MockConnectRequest) -> Result<ConnectResponse, PluginError> {
        self.request(Request::MockConnect(request)).await
    }

    pub async fn disconnect(&self, connection: u32) -> Result<(), PluginError> {
        self.call(Request::Disconnect(DisconnectRequest { connection }), self.options.request_timeout)
            .await
            .map(|_| ())
    }

    /// Read one field; a failed field comes back as `Ok(FieldResult::Error)`.
    pub async fn get_data(&self, request: GetDataRequest) -> Result<FieldResult, PluginError> {
        self.request(Request::GetData(request)).await
    }

    /// Read one field, turning a failed field into an error.
    pub async fn get_field(&self, request: GetDataRequest) -> Result<RawData, PluginError> {
        let resource = request.resource.clone();
        self.get_data(request).await?.into_result().map_err(|message| PluginError::Remote {
            provider: self.name.clone(),
            message: format!("{resource}: {message}"),
        })
    }

    pub async fn store_data(&self, connection: u32, resources: Vec<ResourceSnapshot>) -> Result<StoreDataResponse, PluginError> {
        self.request(Request::StoreData(StoreDataRequest { connection, resources })).await
    }

    /// Ask the provider to close every connection and exit, then wait for the
    /// process when this client launched it.
    pub async fn shutdown(&self) -> Result<(), PluginError> {
        let outcome = self.call(Request::Shutdown, self.options.request_timeout).await.map(|_| ());

        let child = self.child.lock().expect("child handle lock poisoned").take();
        if let Some(mut child) = child {
            match timeout(self.options.request_timeout, child.wait()).await {
                Ok(Ok(status)) => debug!(provider = %self.name, %status, "provider exited"),
                Ok(Err(error)) => warn!(provider = %self.name, error = %error, "failed to wait for provider"),
                Err(_) => {
                    warn!(provider = %self.name, "provider did not exit in time; killing it");
                    let _ = child.kill().await;
                }
            }
        }
        outcome
    }

    /// Send `request` and decode its result.
    pub async fn request<T: DeserializeOwned>(&self, request: Request) -> Result<T, PluginError> {
        self.request_within(request, self.options.request_timeout).await
    }

    async fn request_within<T: DeserializeOwned>(&self, request: Request, limit: Duration) -> Result<T, PluginError> {
        let value = self.call(request, limit).await?;
        Ok(serde_json::from_value(value).map_err(ProtocolError::from)?)
    }

    async fn call(&self, request: Request, limit: Duration) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let method = request.method();
        let (reply, response) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending request lock poisoned");
            let Some(pending) = pending.as_mut() else {
                return Err(self.closed());
            };
            pending.insert(id, reply);
        }

        if self.outgoing.send(Frame::Request { id, body: request }).await.is_err() {
            self.forget(id);
            return Err(self.closed());
        }

        match timeout(limit, response).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(self.closed()),
            Err(_) => {
                self.forget(id);
                Err(ProtocolError::Timeout {
                    operation: method.to_string(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
                .into())
            }
        }
    }

    fn forget(&self, id: u64) {
        if let Some(pending) = self.pending.lock().expect("pending request lock poisoned").as_mut() {
            pending.remove(&id);
        }
    }

    fn closed(&self) -> PluginError {
        ProtocolError::Closed {
            provider: self.name.clone(),
        }
        .into()
    }

    pub(crate) fn attach_child(&self, child: Child) {
        *self.child.lock().expect("child handle lock poisoned") = Some(child);
    }
}

impl Drop for ProviderClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_frames<R>(name: String, reader: R, pending: Pending, callback: Option<Arc<dyn ProviderCallback>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                warn!(provider = %name, error = %error, "failed to read from provider");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Frame::decode(&line) {
            Ok(Frame::Response { id, result, error }) => {
                let sender = pending
                    .lock()
                    .expect("pending request lock poisoned")
                    .as_mut()
                    .and_then(|pending| pending.remove(&id));
                let Some(sender) = sender else {
                    debug!(provider = %name, id, "response for an abandoned request");
                    continue;
                };
                let reply = match error {
                    Some(message) => Err(PluginError::Remote {
                        provider: name.clone(),
                        message,
                    }),
                    None => Ok(result.unwrap_or(serde_json::Value::Null)),
                };
                let _ = sender.send(reply);
            }
            Ok(Frame::Callback { connection, message }) => match &callback {
                Some(callback) => callback.collect(connection, message),
                None => debug!(provider = %name, connection, "no callback registered; dropping message"),
            },
            Ok(Frame::Request { id, .. }) => warn!(provider = %name, id, "provider sent a request; ignoring it"),
            Err(error) => warn!(provider = %name, error = %error, "malformed frame from provider"),
        }
    }

    let abandoned = pending.lock().expect("pending request lock poisoned").take();
    for (_, sender) in abandoned.into_iter().flatten() {
        let _ = sender.send(Err(ProtocolError::Closed { provider: name.clone() }.into()));
    }
    debug!(provider = %name, "provider output closed");
}

async fn write_frames<W>(name: String, writer: W, mut frames: mpsc::Receiver<Frame>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer;
    while let Some(frame) = frames.recv().await {
        let written = match frame.encode() {
            Ok(line) => match writer.write_all(&line).await {
                Ok(()) => writer.flush().await,
                Err(error) => Err(error),
            },
            Err(error) => {
                warn!(provider = %name, error = %error, "failed to encode request");
                continue;
            }
        };
        if let Err(error) = written {
            warn!(provider = %name, error = %error, "failed to write to provider");
            break;
        }
    }
}
