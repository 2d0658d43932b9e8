//! Bounded-timeout request/response calls between mesh nodes.
//!
//! [`PeerTransport`] is the only I/O primitive the gossip and replication
//! protocols use.  [`RpcClient`] implements it over `reqwest`; tests swap
//! in an in-memory double.
//!
//! Failures are split by kind because callers react differently: only
//! [`RpcError::ConnectionRefused`] may mark a peer down.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Query parameters of one mesh call.
pub type Params = HashMap<String, String>;

/// Boxed future returned by [`PeerTransport::call`].
pub type RpcFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'a>>;

/// Transport-level failures of a mesh call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The peer did not answer within the per-call timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Nothing is listening at the peer's address.
    #[error("connection to {url} refused")]
    ConnectionRefused { url: String },

    /// The peer answered with a body that is not JSON.
    #[error("invalid JSON response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    /// Any other network failure (DNS, reset, TLS, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl RpcError {
    /// Short label used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Timeout { .. } => "timeout",
            RpcError::ConnectionRefused { .. } => "connection_refused",
            RpcError::InvalidResponse { .. } => "invalid_response",
            RpcError::Transport { .. } => "transport",
        }
    }
}

/// Something that can issue a JSON request/response call to a peer.
pub trait PeerTransport: Send + Sync + 'static {
    /// `GET url?params`, expecting a JSON body.
    fn call<'a>(&'a self, url: &'a str, params: &'a Params) -> RpcFuture<'a>;
}

/// `reqwest`-backed transport with a fixed per-call timeout.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        // Mesh traffic stays inside the cluster network.
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn request(&self, url: &str, params: &Params) -> Result<Value, RpcError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        // The body is parsed whatever the status: error replies are JSON too.
        let body = response.bytes().await.map_err(|e| classify(url, e))?;
        serde_json::from_slice(&body).map_err(|e| RpcError::InvalidResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

impl PeerTransport for RpcClient {
    fn call<'a>(&'a self, url: &'a str, params: &'a Params) -> RpcFuture<'a> {
        Box::pin(self.request(url, params))
    }
}

/// Map a `reqwest` failure onto the mesh failure kinds.
fn classify(url: &str, err: reqwest::Error) -> RpcError {
    let url = url.to_string();
    if err.is_timeout() {
        RpcError::Timeout { url }
    } else if is_connection_refused(&err) {
        RpcError::ConnectionRefused { url }
    } else {
        RpcError::Transport { url, source: err }
    }
}

/// Walk the error chain looking for an `ECONNREFUSED` I/O error.
fn is_connection_refused(err: &reqwest::Error) -> bool {
    if !err.is_connect() {
        return false;
    }
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return io.kind() == std::io::ErrorKind::ConnectionRefused;
        }
        source = cause.source();
    }
    false
}
