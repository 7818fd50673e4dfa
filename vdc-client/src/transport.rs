//! Single HTTP exchange: request formatting, header handling and response
//! normalization.

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::context::RequestContext;
use crate::error::{ApiError, Error, Result};
use crate::retry::parse_rate_limit_reset;

pub const USER_ID_HEADER: &str = "X-Auth-UserID";
pub const TOKEN_HEADER: &str = "X-Auth-Token";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const RATE_LIMIT_RESET_HEADER: &str = "ratelimit-reset";

/// One REST call.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    /// Path relative to the API base URL, starting with `/`.
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Return right after the API accepted a mutation, even in synchronous mode.
    pub skip_completion_wait: bool,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            skip_completion_wait: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self> {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn patch<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self> {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn with_body<B: Serialize>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| {
            Error::Validation(format!("failed to encode body for {}: {}", self.path, e))
        })?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn skip_completion_wait(mut self) -> Self {
        self.skip_completion_wait = true;
        self
    }

    /// Whether the call changes state on the platform.
    pub fn is_mutation(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }
}

/// Response of a successful (2xx) exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub request_id: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Decode the body, reporting failures as [`Error::Decode`].
    pub fn json<T: DeserializeOwned>(&self, request: &RestRequest) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|source| Error::Decode {
            method: request.method.clone(),
            path: request.path.clone(),
            request_id: self.request_id.clone(),
            source,
        })
    }
}

/// Sends single REST calls. Cheap to clone; the underlying HTTP client is
/// shared.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = match &config.http_client {
            Some(client) => client.clone(),
            None => reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()
                .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?,
        };

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            headers: default_headers(config)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one exchange. Responses with status >= 300 become
    /// [`Error::Api`] carrying the request id of the exchange.
    pub async fn send(&self, ctx: &RequestContext, request: &RestRequest) -> Result<RawResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(self.headers.clone());
        if let Some(body) = &request.body {
            let encoded = serde_json::to_vec(body).map_err(|e| {
                Error::Validation(format!("failed to encode body for {}: {}", request.path, e))
            })?;
            builder = builder.body(encoded);
        }

        let transport_error = |source: reqwest::Error| Error::Transport {
            method: request.method.clone(),
            path: request.path.clone(),
            source,
        };

        let started = Instant::now();
        let response = ctx
            .run(async { builder.send().await.map_err(transport_error) })
            .await?;

        let status = response.status();
        let headers = response.headers();
        let request_id = header_str(headers, REQUEST_ID_HEADER).map(str::to_string);
        let rate_limit_reset =
            header_str(headers, RATE_LIMIT_RESET_HEADER).and_then(parse_rate_limit_reset);

        let body = ctx
            .run(async { response.bytes().await.map_err(transport_error) })
            .await?;

        debug!(
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            request_id = request_id.as_deref().unwrap_or("-"),
            correlation_id = ctx.correlation_id().unwrap_or("-"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "API exchange"
        );

        if status.as_u16() >= 300 {
            return Err(Error::Api {
                method: request.method.clone(),
                path: request.path.clone(),
                source: ApiError::from_response(status, request_id, rate_limit_reset, &body),
            });
        }

        Ok(RawResponse {
            status,
            request_id,
            body: body.to_vec(),
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn user_agent() -> String {
    format!(
        "vdc-client/{} ({})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// Authentication, content type and user agent, then configured overrides.
fn default_headers(config: &ClientConfig) -> Result<HeaderMap> {
    let value = |name: &str, raw: &str| {
        HeaderValue::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid value for header {name}: {e}")))
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-auth-userid"),
        value(USER_ID_HEADER, &config.user_id)?,
    );
    let mut token = value(TOKEN_HEADER, &config.api_token)?;
    token.set_sensitive(true);
    headers.insert(HeaderName::from_static("x-auth-token"), token);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, value("User-Agent", &user_agent())?);

    for (name, raw) in &config.http_headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name {name:?}: {e}")))?;
        headers.insert(header, value(name, raw)?);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new("https://api.example.com/", "user-1", "token-1")
    }

    #[test]
    fn test_default_headers() {
        let headers = default_headers(&config()).unwrap();
        assert_eq!(headers["x-auth-userid"], "user-1");
        assert_eq!(headers["x-auth-token"], "token-1");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        let agent = headers[USER_AGENT].to_str().unwrap();
        assert!(agent.starts_with("vdc-client/"));
        assert!(agent.contains(std::env::consts::OS));
    }

    #[test]
    fn test_configured_headers_override_defaults() {
        let config = config()
            .with_http_header("User-Agent", "custom/1.0")
            .with_http_header("X-Tenant", "blue");
        let headers = default_headers(&config).unwrap();
        assert_eq!(headers[USER_AGENT], "custom/1.0");
        assert_eq!(headers["x-tenant"], "blue");
        assert_eq!(headers.get_all(USER_AGENT).iter().count(), 1);
    }

    #[test]
    fn test_invalid_header_rejected() {
        let config = config().with_http_header("bad header", "x");
        assert!(matches!(default_headers(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let transport = Transport::new(&config()).unwrap();
        assert_eq!(transport.base_url(), "https://api.example.com");
    }

    #[test]
    fn test_request_builders() {
        let request = RestRequest::post("/objects/servers", &serde_json::json!({"name": "a"}))
            .unwrap()
            .skip_completion_wait();
        assert!(request.is_mutation());
        assert!(request.skip_completion_wait);
        assert!(!RestRequest::get("/objects/servers").is_mutation());
    }
}
