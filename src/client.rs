//! The request capability used by virtual users.
//!
//! The engine only needs "send a request, get back a status, headers and
//! body"; [`RequestClient`] is that seam. [`ReqwestClient`] is the production
//! implementation, tests plug in in-process fakes.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::ErrorCategory;
use crate::utils::parse_headers_with_escapes;

/// A fully rendered request, ready to send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// What came back from the target.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// A request that never produced a response.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{category}: {message}")]
pub struct TransportError {
    pub category: ErrorCategory,
    pub message: String,
}

impl TransportError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorCategory::TimeoutError,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self::new(ErrorCategory::from_reqwest_error(&error), error.to_string())
    }
}

/// Sends one request. Implementations must be shareable across virtual users.
#[async_trait]
pub trait RequestClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Errors that can occur while building the HTTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid header format in CUSTOM_HEADERS: '{0}'. Expected 'Name:Value'.")]
    HeaderFormat(String),

    #[error("Invalid header name '{name}': {message}")]
    HeaderName { name: String, message: String },

    #[error("Invalid header value for '{name}': {message}")]
    HeaderValue { name: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            skip_tls_verify: false,
            custom_headers: None,
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// reqwest-backed [`RequestClient`]. One pooled client is shared by all
/// virtual users.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(config: &ClientConfig) -> Result<ReqwestClient, ClientError> {
    let mut client_builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout);

    let parsed_headers = configure_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        debug!(count = parsed_headers.len(), "Configured custom default headers");
        client_builder = client_builder.default_headers(parsed_headers);
    }

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder = client_builder.danger_accept_invalid_certs(true);
    }

    Ok(ReqwestClient::new(client_builder.build()?))
}

fn configure_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, ClientError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair_str in parse_headers_with_escapes(headers_str) {
        let trimmed = header_pair_str.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (name_str, value_str) = trimmed
            .split_once(':')
            .map(|(n, v)| (n.trim(), v.trim()))
            .ok_or_else(|| ClientError::HeaderFormat(trimmed.to_string()))?;

        if name_str.is_empty() {
            return Err(ClientError::HeaderFormat(trimmed.to_string()));
        }

        let header_name = HeaderName::from_str(name_str).map_err(|e| ClientError::HeaderName {
            name: name_str.to_string(),
            message: e.to_string(),
        })?;
        let header_value =
            HeaderValue::from_str(value_str).map_err(|e| ClientError::HeaderValue {
                name: name_str.to_string(),
                message: e.to_string(),
            })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_headers_parsed() {
        let headers =
            configure_custom_headers(Some("X-Env:staging,Accept:application/json\\,text/plain"))
                .unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-env"], "staging");
        assert_eq!(headers["accept"], "application/json,text/plain");
    }

    #[test]
    fn test_custom_headers_missing_colon() {
        let err = configure_custom_headers(Some("NoColonHere")).unwrap_err();
        assert!(matches!(err, ClientError::HeaderFormat(_)));
    }

    #[test]
    fn test_custom_headers_empty_name() {
        let err = configure_custom_headers(Some(":value")).unwrap_err();
        assert!(matches!(err, ClientError::HeaderFormat(_)));
    }

    #[test]
    fn test_no_custom_headers() {
        assert!(configure_custom_headers(None).unwrap().is_empty());
        assert!(configure_custom_headers(Some("")).unwrap().is_empty());
    }

    #[test]
    fn test_timeout_error_category() {
        let err = TransportError::timeout(Duration::from_millis(250));
        assert_eq!(err.category, ErrorCategory::TimeoutError);
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_build_client_default() {
        assert!(build_client(&ClientConfig::default()).is_ok());
    }
}
