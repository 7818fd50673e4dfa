//! Error types for vdc-client.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::ident::ObjectId;

/// Result type using the client [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error reported by the API for a response with status >= 300.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status_code: u16,
    pub title: String,
    pub description: String,
    /// Server-assigned `X-Request-Id` of the failed exchange.
    pub request_id: Option<String>,
    /// Parsed `ratelimit-reset` header, only meaningful on 429.
    pub rate_limit_reset: Option<DateTime<Utc>>,
}

/// Error envelope returned by the API.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

impl ApiError {
    /// Build an error from a failed response, falling back to the reason
    /// phrase when the body carries no usable envelope.
    pub fn from_response(
        status: StatusCode,
        request_id: Option<String>,
        rate_limit_reset: Option<DateTime<Utc>>,
        body: &[u8],
    ) -> Self {
        let reason = status.canonical_reason().unwrap_or("unknown error");
        let (title, description) = match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) if !envelope.title.is_empty() => (envelope.title, envelope.description),
            Ok(envelope) => (reason.to_string(), envelope.description),
            Err(_) => (
                reason.to_string(),
                String::from_utf8_lossy(body).trim().to_string(),
            ),
        };

        Self {
            status_code: status.as_u16(),
            title,
            description,
            request_id,
            rate_limit_reset,
        }
    }

    /// Whether the platform asks for the incident to be reported.
    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status code {}: {}", self.status_code, self.title)?;
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        write!(
            f,
            " (request id: {})",
            self.request_id.as_deref().unwrap_or("unknown")
        )?;
        if self.is_server_error() {
            write!(
                f,
                "; please report this incident to support and include the request id"
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Classification of an [`Error`], independent of how it is wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Transport,
    ServerTransient,
    StateConflict,
    RateLimited,
    NotFound,
    Conflict,
    Permanent,
    Decode,
    AsyncFailed,
    Timeout,
    Cancelled,
    AppliedWaitCancelled,
}

/// Errors that can occur when talking to the API.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed identifier, empty required field or similar local check.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network, TLS or connection failure before a response was received.
    #[error("{method} {path}: transport error: {source}")]
    Transport {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with status >= 300.
    #[error("{method} {path}: {source}")]
    Api {
        method: Method,
        path: String,
        #[source]
        source: ApiError,
    },

    /// A 2xx body could not be decoded into the expected type.
    #[error("{method} {path}: failed to decode response (request id: {}): {source}", .request_id.as_deref().unwrap_or("unknown"))]
    Decode {
        method: Method,
        path: String,
        request_id: Option<String>,
        #[source]
        source: serde_json::Error,
    },

    /// The request status endpoint reported `failed`.
    #[error("request {request_id} failed: {message}")]
    AsyncFailed { request_id: String, message: String },

    /// A polling deadline elapsed.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The caller's context deadline elapsed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The mutation was accepted, but waiting for its completion was cancelled.
    /// The mutation is not rolled back.
    #[error("request {request_id} was applied but waiting for its completion was cancelled")]
    AppliedWaitCancelled {
        request_id: String,
        object_id: Option<ObjectId>,
    },

    /// Retries ran out; wraps the last error.
    #[error("maximum number of retries exhausted: {0}")]
    RetriesExhausted(#[source] Box<Error>),

    /// An error annotated with the operation and subjects it happened on.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap the error with a short context string.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, seen through context and retry wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            Error::RetriesExhausted(inner) => inner.root(),
            other => other,
        }
    }

    /// The API error, if this error came from a response with status >= 300.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self.root() {
            Error::Api { source, .. } => Some(source),
            _ => None,
        }
    }

    /// HTTP status code of the failed exchange, if any.
    pub fn status_code(&self) -> Option<u16> {
        self.api_error().map(|e| e.status_code)
    }

    /// Server-assigned request id, if one is attached to the error.
    pub fn request_id(&self) -> Option<&str> {
        match self.root() {
            Error::Api { source, .. } => source.request_id.as_deref(),
            Error::Decode { request_id, .. } => request_id.as_deref(),
            Error::AsyncFailed { request_id, .. } => Some(request_id),
            Error::AppliedWaitCancelled { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Config(_) => ErrorKind::Validation,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Api { source, .. } => match source.status_code {
                404 => ErrorKind::NotFound,
                409 => ErrorKind::Conflict,
                424 => ErrorKind::StateConflict,
                429 => ErrorKind::RateLimited,
                code if code >= 500 => ErrorKind::ServerTransient,
                _ => ErrorKind::Permanent,
            },
            Error::Decode { .. } => ErrorKind::Decode,
            Error::AsyncFailed { .. } => ErrorKind::AsyncFailed,
            Error::Timeout(_) | Error::DeadlineExceeded => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::AppliedWaitCancelled { .. } => ErrorKind::AppliedWaitCancelled,
            Error::RetriesExhausted(inner) => inner.kind(),
            Error::Context { source, .. } => source.kind(),
        }
    }
}

/// Adds context to results carrying a client [`Error`].
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Treat API errors with one of `codes` as success.
///
/// Returns `Ok(None)` for a suppressed error, `Ok(Some(value))` on success and
/// the error itself otherwise.
pub fn suppress<T>(result: Result<T>, codes: &[u16]) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.status_code().is_some_and(|code| codes.contains(&code)) => {
            debug!("Suppressed API error: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, request_id: &str) -> Error {
        Error::Api {
            method: Method::DELETE,
            path: "/objects/servers/x/isoimages/y".to_string(),
            source: ApiError {
                status_code: status,
                title: "Not Found".to_string(),
                description: "no such relation".to_string(),
                request_id: Some(request_id.to_string()),
                rate_limit_reset: None,
            },
        }
    }

    #[test]
    fn test_display_contains_request_id() {
        let err = api(404, "req-1");
        let text = err.to_string();
        assert!(text.contains("req-1"), "{text}");
        assert!(text.contains("status code 404"), "{text}");
        assert!(!text.contains("report"), "{text}");
    }

    #[test]
    fn test_server_error_asks_for_report() {
        let err = api(503, "req-2");
        assert!(err.to_string().contains("please report"));
    }

    #[test]
    fn test_wrappers_keep_status_and_request_id() {
        let err = Error::RetriesExhausted(Box::new(api(500, "req-3")))
            .context("link storage to server s1");
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.request_id(), Some("req-3"));
        assert_eq!(err.kind(), ErrorKind::ServerTransient);
        let text = err.to_string();
        assert!(text.starts_with("link storage to server s1: maximum number of retries exhausted"));
        assert!(text.contains("req-3"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(api(404, "r").kind(), ErrorKind::NotFound);
        assert_eq!(api(409, "r").kind(), ErrorKind::Conflict);
        assert_eq!(api(424, "r").kind(), ErrorKind::StateConflict);
        assert_eq!(api(429, "r").kind(), ErrorKind::RateLimited);
        assert_eq!(api(400, "r").kind(), ErrorKind::Permanent);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(Error::DeadlineExceeded.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_suppress() {
        assert!(matches!(suppress::<()>(Err(api(404, "r")), &[404, 409]), Ok(None)));
        assert!(matches!(suppress::<()>(Err(api(409, "r")), &[404, 409]), Ok(None)));
        assert!(suppress::<()>(Err(api(500, "r")), &[404, 409]).is_err());
        assert!(suppress::<()>(Err(Error::Cancelled), &[404]).is_err());
        assert_eq!(suppress(Ok(7), &[404]).unwrap(), Some(7));
    }

    #[test]
    fn test_envelope_fallbacks() {
        let err = ApiError::from_response(
            StatusCode::BAD_REQUEST,
            None,
            None,
            br#"{"title":"Invalid","description":"cores must be positive"}"#,
        );
        assert_eq!(err.title, "Invalid");
        assert_eq!(err.description, "cores must be positive");

        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, None, None, b"upstream down");
        assert_eq!(err.title, "Bad Gateway");
        assert_eq!(err.description, "upstream down");
        assert!(err.to_string().contains("request id: unknown"));
    }
}
