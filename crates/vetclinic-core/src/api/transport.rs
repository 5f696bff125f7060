//! The base "send a request" capability.
//!
//! Everything above this layer (credential attachment, 401 recovery, typed
//! decoding) is written against the `Transport` trait, so tests can swap
//! the reqwest implementation for a scripted fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use tracing::debug;

use super::{ApiError, ApiRequest, ApiResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatch one request. Only failures that produced no response are
    /// errors; a 4xx or 5xx comes back as an `ApiResponse`.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        (**self).send(request).await
    }
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    /// `scheme://host:port` of the base URL
    origin: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let origin = Url::parse(&base_url)
            .map_err(|e| ApiError::Transport(format!("Invalid base URL '{}': {}", base_url, e)))?
            .origin()
            .ascii_serialization();
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            origin,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join a request path onto the base URL. Absolute URLs (such as the
    /// `next` link of a paginated response) are used as they are, but only
    /// on the API's own origin since requests carry the bearer token.
    pub fn url_for(&self, path: &str) -> Result<String, ApiError> {
        if !(path.starts_with("http://") || path.starts_with("https://")) {
            return Ok(format!("{}/{}", self.base_url, path.trim_start_matches('/')));
        }

        let url = Url::parse(path)
            .map_err(|e| ApiError::Transport(format!("Invalid URL '{}': {}", path, e)))?;
        let origin = url.origin().ascii_serialization();
        if origin != self.origin {
            return Err(ApiError::Transport(format!(
                "Refusing to send credentials to foreign origin {}",
                origin
            )));
        }
        Ok(path.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let ApiRequest {
            method,
            path,
            query,
            body,
            headers,
            kind,
        } = request;
        let url = self.url_for(&path)?;

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .headers(headers)
            .header(header::ACCEPT, "application/json");
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(ref body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(ApiError::from_reqwest)?;

        debug!(%method, %url, ?kind, status = status.as_u16(), "HTTP request completed");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
