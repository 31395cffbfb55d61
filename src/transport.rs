//! HTTP transport seam.
//!
//! The pipeline talks to the network only through [`Transport`], so tests
//! and embedders can inject their own implementation. [`ReqwestTransport`]
//! is the default: an async `reqwest` client driven by a runtime the
//! transport owns, so a cancelled call drops its in-flight request.

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::types::HttpMethod;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Which of the two clients a request runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Short-lived request/response operations.
    Transactional,
    /// Long-poll subscribe requests held open by the server.
    Streaming,
}

/// Fully built request handed to a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Absolute URL including the encoded query string.
    pub url: String,
    pub body: Vec<u8>,
    pub connect_timeout: Duration,
    /// Read timeout for the whole exchange.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Path portion of the URL without scheme, host or query.
    pub fn path(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let path = without_scheme
            .find('/')
            .map(|i| &without_scheme[i..])
            .unwrap_or("/");
        path.split('?').next().unwrap_or(path)
    }

    /// Decoded-as-sent value of query parameter `key`.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        let (_, query) = self.url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

/// Raw response from a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
    /// The call was abandoned because its cancellation token fired.
    pub cancelled: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
            cancelled: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            ..Self::new(message)
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::new("request cancelled")
        }
    }
}

/// Blocking HTTP transport.
///
/// `send` runs on the caller's thread. When `cancel` fires, implementations
/// must stop waiting, release the connection and return
/// [`TransportError::cancelled`] promptly; the subscribe loop relies on this
/// to keep at most one long-poll open.
pub trait Transport: Send + Sync {
    /// Execute one request, honoring its connect and read timeouts.
    fn send(
        &self,
        request: &HttpRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Default transport: async `reqwest` on a private single-worker runtime.
///
/// `reqwest` fixes the connect timeout per client, so one client is kept
/// per distinct connect timeout seen; in practice that is one.
pub struct ReqwestTransport {
    read_timeout: Duration,
    clients: Mutex<HashMap<Duration, reqwest::Client>>,
    runtime: tokio::runtime::Runtime,
}

impl ReqwestTransport {
    /// Build a client tuned for `kind` from the config timeouts.
    pub fn for_config(config: &Config, kind: TransportKind) -> Result<Self, TransportError> {
        let read_timeout = match kind {
            TransportKind::Transactional => config.non_subscribe_request_timeout,
            TransportKind::Streaming => config.subscribe_request_timeout,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(match kind {
                TransportKind::Transactional => "pubwire-http",
                TransportKind::Streaming => "pubwire-http-stream",
            })
            .enable_all()
            .build()
            .map_err(|e| TransportError::new(format!("failed to start HTTP runtime: {e}")))?;

        let transport = Self {
            read_timeout,
            clients: Mutex::new(HashMap::new()),
            runtime,
        };
        transport.client(config.connect_timeout)?;
        Ok(transport)
    }

    /// Client whose connect phase is bounded by `connect_timeout`.
    fn client(&self, connect_timeout: Duration) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }

        let _guard = self.runtime.enter();
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(self.read_timeout)
            .user_agent(concat!("pubwire/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::new(e.to_string()))?;
        debug!(connect_timeout_ms = connect_timeout.as_millis() as u64, "built HTTP client");
        clients.insert(connect_timeout, client.clone());
        Ok(client)
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: &HttpRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client(request.connect_timeout)?
            .request(method, &request.url)
            .timeout(request.timeout);
        if !request.body.is_empty() {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(request.body.clone());
        }

        let exchange = async move {
            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            })
        };

        // Losing the race drops `exchange`, which closes the connection.
        self.runtime.block_on(async {
            match cancel {
                Some(token) => tokio::select! {
                    result = exchange => result,
                    _ = token.cancelled() => Err(TransportError::cancelled()),
                },
                None => exchange.await,
            }
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    TransportError {
        timed_out: e.is_timeout(),
        cancelled: false,
        message: e.to_string(),
    }
}
