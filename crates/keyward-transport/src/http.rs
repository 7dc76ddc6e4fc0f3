//! HTTP transports using `reqwest`.

use std::time::Duration;

use keyward_protocol::{
    Codec, ExchangeRequest, ExchangeResponse, JsonCodec,
};
use reqwest::header::CONTENT_TYPE;

use crate::{
    rejection_detail, ApiRequest, ApiResponse, ApiTransport, ExchangeBackend,
    ExchangeError, Method, TransportError,
};

const USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

fn build_client(timeout: Duration) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::Config(e.to_string()))
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::Unreachable(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

/// [`ExchangeBackend`] that posts to `<base_url><exchange_path>`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpBackend {
    /// # Errors
    /// Returns `TransportError::Config` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        exchange_path: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: join_url(base_url, exchange_path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ExchangeBackend for HttpBackend {
    async fn exchange(
        &self,
        provider_token: &str,
    ) -> Result<ExchangeResponse, ExchangeError> {
        let body = JsonCodec.encode(&ExchangeRequest::new(provider_token))?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_send_error)?;

        if status.is_success() {
            // A 2xx is the backend's acknowledgement. A body we cannot read
            // just means it echoed nothing useful back.
            return Ok(JsonCodec.decode(&bytes).unwrap_or_else(|e| {
                tracing::warn!(
                    error = %e,
                    "exchange succeeded with an unreadable body"
                );
                ExchangeResponse::default()
            }));
        }

        let detail =
            rejection_detail(status.as_u16(), &bytes, status.canonical_reason());
        tracing::warn!(status = status.as_u16(), %detail, "exchange rejected");
        Err(ExchangeError::Rejected {
            status: status.as_u16(),
            detail,
        })
    }
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// [`ApiTransport`] that sends requests relative to a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// # Errors
    /// Returns `TransportError::Config` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.to_string(),
        })
    }
}

impl ApiTransport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: &str,
    ) -> Result<ApiResponse, TransportError> {
        let url = join_url(&self.base_url, &request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &url).bearer_auth(bearer);
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_send_error)?;

        tracing::debug!(method = %request.method, path = %request.path, status, "api call");
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}
