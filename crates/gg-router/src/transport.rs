//! Transport - outbound HTTP seam between the gateway and guard backends
//!
//! The monitor and dispatcher only talk to backends through [`GuardTransport`],
//! so tests can substitute an instrumented in-memory transport.

use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::RouterError;

/// Response received from a backend
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body as JSON. Non-JSON text becomes a JSON string, an empty body `null`.
    pub fn json_body(&self) -> serde_json::Value {
        if self.body.iter().all(|b| b.is_ascii_whitespace()) {
            return serde_json::Value::Null;
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| serde_json::Value::String(self.body_text()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Connection(String),
}

/// Outbound HTTP operations used against guard services
#[async_trait]
pub trait GuardTransport: Send + Sync {
    /// GET `url`, giving up after `timeout`
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError>;

    /// POST `body` as JSON to `url`, giving up after `timeout`
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    /// Release pooled connections. Calls after this fail with a connection error.
    async fn close(&self) {}
}

/// Configuration for the reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 50,
            user_agent: format!("guard-gateway/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// reqwest implementation of [`GuardTransport`]
pub struct HttpTransport {
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| RouterError::Transport(e.to_string()))?;

        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }

    fn client(&self) -> Result<reqwest::Client, TransportError> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| TransportError::Connection("transport closed".to_string()))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<TransportResponse, TransportError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl GuardTransport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError> {
        debug!(url = %url, "GET");
        let request = self.client()?.get(url).timeout(timeout);
        self.execute(request).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        debug!(url = %url, "POST");
        let request = self.client()?.post(url).json(body).timeout(timeout);
        self.execute(request).await
    }

    async fn close(&self) {
        if self.client.write().take().is_some() {
            info!("HTTP transport closed, idle connections released");
        }
    }
}
