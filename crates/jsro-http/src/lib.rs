//! reqwest-backed [`Transport`] implementation.

use async_trait::async_trait;
use serde_json::Value;

use jsro_core::transport::{Method, Transport, TransportError};

/// [`Transport`] over a shared [`reqwest::Client`].
///
/// Dropping an in-flight future cancels the underlying request, which is
/// exactly the abort contract the client core relies on for its watchdog
/// and teardown paths.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build on a fresh client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build on an existing client (connection pool, proxy, TLS setup).
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))
    }
}
