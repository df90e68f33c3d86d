//! # Inquest Plugin
//!
//! Process boundary between the orchestrator and provider backends.
//!
//! A provider implements [`Provider`] and hands it to a [`PluginService`],
//! which multiplexes runtimes by connection fingerprint. [`serve_stdio`]
//! exposes the service over newline-delimited JSON on stdin/stdout; the
//! orchestrator drives it through a [`ProviderClient`], usually obtained from
//! a [`ProviderManager`] configured by [`ProvidersConfig`].

pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod provider;
pub mod recording;
pub mod server;
pub mod service;

pub use callback::{ChannelCallback, Envelope};
pub use client::{ClientOptions, ProviderClient, ProviderManager};
pub use config::{ProviderSettings, ProvidersConfig};
pub use error::{PluginError, ProtocolError};
pub use protocol::{
    ConnectRequest, ConnectResponse, DisconnectRequest, Frame, GetDataRequest, MockConnectRequest, ParseCliResponse, RecordingSource, Request,
    StoreDataRequest, StoreDataResponse,
};
pub use provider::{Capability, ConnectorDescriptor, Detection, FlagDescriptor, FlagKind, ParseCliRequest, Provider, ProviderDescriptor};
pub use recording::{RecordedAsset, Recording};
pub use server::{serve, serve_stdio};
pub use service::{Fingerprint, PluginService};
