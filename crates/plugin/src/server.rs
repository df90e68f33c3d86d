//! Provider-side request loop.

use std::sync::Arc;
use std::time::Duration;

use inquest_engine::{CallbackMessage, ProviderCallback};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{PluginError, ProtocolError};
use crate::protocol::{Frame, Request};
use crate::provider::Provider;
use crate::service::PluginService;

const OUTGOING_CAPACITY: usize = 1024;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Emits callback messages as frames on the provider's output.
struct WireCallback {
    frames: mpsc::Sender<Frame>,
}

impl ProviderCallback for WireCallback {
    fn collect(&self, connection_id: u32, message: CallbackMessage) {
        let frame = Frame::Callback {
            connection: connection_id,
            message,
        };
        if self.frames.try_send(frame).is_err() {
            warn!(connection_id, "output is congested or closed; dropping callback message");
        }
    }
}

/// Serve requests from the orchestrator on stdin, answering on stdout.
///
/// An interrupt closes every connection before returning.
pub async fn serve_stdio<P: Provider>(service: Arc<PluginService<P>>) -> Result<(), ProtocolError> {
    let serving = serve(Arc::clone(&service), tokio::io::stdin(), tokio::io::stdout());
    tokio::select! {
        result = serving => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            info!(provider = %service.descriptor().id, "interrupted; closing connections");
            service.shutdown();
            Ok(())
        }
    }
}

/// Serve newline-delimited requests from `reader` until `shutdown` arrives or the input ends.
///
/// Requests are handled concurrently and answered in completion order. Lines
/// that are not valid UTF-8 or JSON are skipped. Every connection is closed
/// before this returns, including when reading the input fails.
pub async fn serve<P, R, W>(service: Arc<PluginService<P>>, reader: R, writer: W) -> Result<(), ProtocolError>
where
    P: Provider,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (frames, outgoing) = mpsc::channel::<Frame>(OUTGOING_CAPACITY);
    let writer_task = tokio::spawn(write_frames(writer, outgoing));
    let callback: Arc<dyn ProviderCallback> = Arc::new(WireCallback { frames: frames.clone() });

    let mut segments = BufReader::new(reader).split(b'\n');
    let mut in_flight = JoinSet::new();
    let mut shutdown_id = None;
    let mut read_error = None;

    info!(provider = %service.descriptor().id, version = %service.descriptor().version, "provider serving");
    loop {
        let segment = tokio::select! {
            segment = segments.next_segment() => segment,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(error) = joined
                    && error.is_panic()
                {
                    std::panic::resume_unwind(error.into_panic());
                }
                continue;
            }
        };
        let segment = match segment {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                debug!("orchestrator closed the input");
                break;
            }
            Err(error) => {
                warn!(error = %error, "reading the input failed; closing connections");
                read_error = Some(error);
                break;
            }
        };
        let line = match String::from_utf8(segment) {
            Ok(line) => line,
            Err(error) => {
                warn!(error = %error, "ignoring frame that is not valid UTF-8");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (id, request) = match Frame::decode(&line) {
            Ok(Frame::Request { id, body }) => (id, body),
            Ok(other) => {
                warn!(frame = ?other, "ignoring frame that is not a request");
                continue;
            }
            Err(error) => {
                warn!(error = %error, "ignoring malformed frame");
                continue;
            }
        };

        if matches!(request, Request::Shutdown) {
            shutdown_id = Some(id);
            break;
        }

        let service = Arc::clone(&service);
        let frames = frames.clone();
        let callback = Arc::clone(&callback);
        in_flight.spawn(async move {
            let method = request.method();
            let frame = match dispatch(&service, request, callback).await {
                Ok(result) => Frame::Response {
                    id,
                    result: Some(result),
                    error: None,
                },
                Err(error) => {
                    debug!(id, method, error = %error, "request failed");
                    Frame::Response {
                        id,
                        result: None,
                        error: Some(error.to_string()),
                    }
                }
            };
            if frames.send(frame).await.is_err() {
                warn!(id, method, "output closed before the response was written");
            }
        });
    }

    in_flight.shutdown().await;
    service.shutdown();
    if let Some(id) = shutdown_id {
        let _ = frames
            .send(Frame::Response {
                id,
                result: Some(serde_json::Value::Null),
                error: None,
            })
            .await;
    }

    drop(callback);
    drop(frames);
    let drained = match timeout(SHUTDOWN_TIMEOUT, writer_task).await {
        Ok(Ok(result)) => result,
        Ok(Err(error)) => Err(ProtocolError::Unexpected {
            message: format!("writer task failed: {error}"),
        }),
        Err(_) => {
            warn!("output did not drain before the shutdown timeout");
            Ok(())
        }
    };
    match read_error {
        Some(error) => Err(error.into()),
        None => drained,
    }
}

async fn dispatch<P: Provider>(
    service: &PluginService<P>,
    request: Request,
    callback: Arc<dyn ProviderCallback>,
) -> Result<serde_json::Value, PluginError> {
    match request {
        Request::ParseCli(request) => encode(service.parse_cli(&request)?),
        Request::Connect(request) => encode(service.connect(request, Some(callback)).await?),
        Request::MockConnect(request) => encode(service.mock_connect(request, Some(callback)).await?),
        Request::Disconnect(request) => {
            service.disconnect(request.connection)?;
            Ok(serde_json::Value::Null)
        }
        Request::GetData(request) => encode(service.get_data(request).await?),
        Request::StoreData(request) => encode(service.store_data(request).await?),
        Request::Heartbeat => encode(service.descriptor()),
        Request::Shutdown => {
            service.shutdown();
            Ok(serde_json::Value::Null)
        }
    }
}

fn encode<T: Serialize>(value: T) -> Result<serde_json::Value, PluginError> {
    Ok(serde_json::to_value(value).map_err(ProtocolError::from)?)
}

async fn write_frames<W>(writer: W, mut frames: mpsc::Receiver<Frame>) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer;
    while let Some(frame) = frames.recv().await {
        let line = match frame.encode() {
            Ok(line) => line,
            Err(error) => {
                warn!(error = %error, "failed to encode frame");
                continue;
            }
        };
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}
