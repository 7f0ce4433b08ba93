/// Outbound HTTP plumbing
///
/// This module contains:
/// - Request/response values shared by the transport, cache and retry layers
/// - The `Transport` seam and its reqwest implementation
/// - Retry policy with exponential backoff and per-attempt deadlines
/// - `HttpClient`, which layers the response cache in front of the retry executor

mod client;
pub mod retry;
mod transport;

pub use client::HttpClient;
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy, TimeoutConfig};
pub use transport::{ReqwestTransport, Transport};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// One outbound request, independent of the HTTP library that sends it
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Serialized request body, hashed verbatim into the cache key
    pub body: Option<Vec<u8>>,
    /// Bearer credential; only its presence is part of the cache key
    pub bearer_token: Option<String>,
    /// Safe to replay after a response or timeout was observed
    pub idempotent: bool,
    /// Successful responses may be served from and stored in the cache
    pub cacheable: bool,
}

impl HttpRequest {
    /// GET request; idempotent and cacheable
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
            bearer_token: None,
            idempotent: true,
            cacheable: true,
        }
    }

    /// POST request with a JSON body; neither idempotent nor cacheable unless marked
    pub fn post_json(url: Url, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            url,
            body: Some(body),
            bearer_token: None,
            idempotent: false,
            cacheable: false,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }
}

/// Response status and body as received from the wire (or from the cache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Classification of failures that produced no HTTP response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// The connection could not be established; the request never left
    Connect,
    /// The attempt exceeded its deadline
    Timeout,
    /// The request failed while being sent
    Request,
    /// The response body could not be read
    Body,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Body => "body",
        };
        f.write_str(name)
    }
}

impl FromStr for TransportErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect" => Ok(TransportErrorKind::Connect),
            "timeout" => Ok(TransportErrorKind::Timeout),
            "request" => Ok(TransportErrorKind::Request),
            "body" => Ok(TransportErrorKind::Body),
            other => Err(format!("unknown transport error kind '{}'", other)),
        }
    }
}

/// A failed attempt that produced no HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Request
        };
        TransportError::new(kind, err.to_string())
    }
}
