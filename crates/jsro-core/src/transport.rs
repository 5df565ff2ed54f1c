//! The seam between the client core and the hosting HTTP stack.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// HTTP method used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// Network or transport failure surfaced by the hosting environment.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request could not be completed (connect, send, or receive).
    #[error("transport failure: {0}")]
    Network(String),
    /// The response arrived but its body was not parseable JSON.
    #[error("unreadable response body: {0}")]
    Body(String),
}

/// Abortable HTTP request function supplied by the hosting environment.
///
/// Implementations must treat dropping the returned future as cancellation:
/// the poll watchdog and connection teardown abort in-flight requests by
/// dropping them, and a cancelled request must stop consuming the wire.
/// Timers and one-shot completion primitives come from the tokio runtime
/// and are not part of this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request and return the parsed JSON response body.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body is not JSON.
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value, TransportError>;
}
