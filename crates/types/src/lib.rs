//! Shared types for inquest providers and the runtime that hosts them.

pub mod asset;
pub mod raw_data;
pub mod type_tag;
pub mod upstream;

pub use asset::{Asset, ConnectionConfig, Credential, CredentialKind, Platform};
pub use raw_data::{FieldResult, RawData, ResourceRef, Value, ValueError};
pub use type_tag::{Shape, Type, TypeError};
pub use upstream::UpstreamConfig;
