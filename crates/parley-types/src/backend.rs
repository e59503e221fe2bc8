//! Model backend trait.

use crate::{BackendError, CompletionRequest};
use std::future::Future;
use std::pin::Pin;

/// A boxed future resolving to the assistant's reply text.
pub type ReplyFuture<'a> = Pin<Box<dyn Future<Output = Result<String, BackendError>> + Send + 'a>>;

/// Trait for LLM backends that turn a context window into one assistant reply.
///
/// Transport, retries and provider-specific wire formats live behind this
/// trait. Dyn-compatible so callers can hold an `Arc<dyn ModelBackend>`.
pub trait ModelBackend: Send + Sync {
    /// Send the request and wait for the complete reply.
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ReplyFuture<'a>;

    /// Backend name for logging and display.
    fn name(&self) -> &str;
}
