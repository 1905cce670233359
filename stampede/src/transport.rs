//! The request seam: a payload goes in, an HTTP status comes out.
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use stampede_core::ConfigError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Ingestion endpoints of the target service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /events`
    Events,
    /// `POST /events/bulk`
    EventsBulk,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Events => "/events",
            Self::EventsBulk => "/events/bulk",
        }
    }
}

/// A serialized request body plus the number of business events it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub endpoint: Endpoint,
    pub body: Vec<u8>,
    pub events: u64,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Sends one payload and resolves to the response status once the full
/// response has been received.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, payload: Payload) -> impl Future<Output = Result<u16, TransportError>> + Send;
}

/// JSON-over-HTTP transport backed by a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };

        let base_url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("not a base url".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.path()
        )
    }
}

impl Transport for HttpTransport {
    async fn send(&self, payload: Payload) -> Result<u16, TransportError> {
        let res = self
            .client
            .post(self.url(payload.endpoint))
            .header(CONTENT_TYPE, "application/json")
            .body(payload.body)
            .send()
            .await?;

        let status = res.status().as_u16();
        // Latency covers the full response, not just the headers.
        res.bytes().await?;
        Ok(status)
    }
}
