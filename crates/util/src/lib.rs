pub mod memoize;
mod path_processing;
mod redact;

pub use memoize::{Memoizer, Policy};
pub use path_processing::expand_tilde;
pub use redact::redact_sensitive;
