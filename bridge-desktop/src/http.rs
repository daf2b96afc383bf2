//! `HttpClient` over reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("audiobook-core/", env!("CARGO_PKG_VERSION"));

/// Reqwest-backed client. One attempt per request; status codes are never
/// turned into errors here.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// `timeout` is the fallback for requests that carry no deadline.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }

    fn map_error(error: reqwest::Error) -> BridgeError {
        if error.is_timeout() {
            BridgeError::Timeout("HTTP request".to_string())
        } else if error.is_connect() {
            BridgeError::OperationFailed(format!("connection failed: {}", error))
        } else {
            BridgeError::OperationFailed(error.to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = ?request.method, "Executing HTTP request");

        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);
        for (key, value) in request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "HTTP request failed");
            Self::map_error(e)
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(Self::map_error)?;

        Ok(HttpResponse { status, body })
    }
}
