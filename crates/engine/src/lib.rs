//! # Inquest Engine
//!
//! Resource graph runtime hosted by every provider process.
//!
//! A provider declares its resource types as [`ResourceSchema`]s and collects
//! them in a [`SchemaRegistry`]. Each connection gets its own [`Runtime`],
//! which owns the instances created on that connection and hands out fields
//! through memoized, single-flight [`TValue`] cells.
//!
//! ## Field semantics
//!
//! - A field is computed at most once per instance; concurrent readers share
//!   the first computation.
//! - A failed resolver stores its error in the field; other fields are not
//!   affected and readers of the failed field see the same error.
//! - A resolver returning data of the wrong type panics, since it breaks the
//!   contract between the provider and its schema.
//! - Cancelling a read before the resolver finishes leaves the field unset.

pub mod callback;
pub mod connection;
pub mod error;
pub mod resource;
pub mod runtime;
pub mod schema;
pub mod telemetry;
pub mod tvalue;

pub use callback::{CallbackMessage, ProviderCallback};
pub use connection::Connection;
pub use error::EngineError;
pub use resource::{PrivateKey, Resource};
pub use runtime::{ResourceSnapshot, Runtime, RuntimeBuilder};
pub use schema::{Args, Identity, InitOutcome, ResourceSchema, SchemaRegistry};
pub use telemetry::{HttpUpstream, TelemetryEvent, TelemetrySink, TracingSink};
pub use tvalue::{FieldError, State, TValue};

/// Build an [`Args`] map from `name => data` pairs.
#[macro_export]
macro_rules! args {
    () => { $crate::Args::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut args = $crate::Args::new();
        $( args.insert(::std::string::String::from($name), $value); )+
        args
    }};
}
