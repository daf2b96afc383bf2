//! HTTP Client Abstraction
//!
//! The minimal request/response surface provider crates need to talk to a
//! media server. Implementations perform exactly one attempt per call: the
//! progress sync engine owns retry and backoff, and stacking a second retry
//! loop underneath it would multiply the delays it schedules.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Methods used by the media server API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
}

/// Outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    /// Per-request deadline; the client default applies when `None`
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn bearer_token(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(body)
            .map_err(|e| BridgeError::OperationFailed(format!("encode request body: {}", e)))?;
        self.body = Some(Bytes::from(encoded));
        Ok(self.header("Content-Type", "application/json"))
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Response with the body fully buffered
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| BridgeError::OperationFailed(format!("decode response body: {}", e)))
    }

    /// Body as text, lossy on invalid UTF-8. Used for error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Async HTTP client
///
/// Every status code is returned to the caller as a response; only
/// transport failures are errors. A request that exceeds its deadline must
/// fail with [`BridgeError::Timeout`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}
