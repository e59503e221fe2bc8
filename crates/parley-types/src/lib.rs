//! Shared types and error hierarchy for Parley.

pub mod backend;
pub mod error;
pub mod message;
pub mod util;

pub use backend::ModelBackend;
pub use error::{BackendError, ConfigError, StorageError};
pub use message::*;
pub use util::{char_prefix, truncate_str};
