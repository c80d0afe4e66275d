//! Typed errors for upstream model calls.

use thiserror::Error;

/// Broad category of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LlmErrorKind {
    /// HTTP 429
    #[error("rate limited")]
    RateLimited,
    /// HTTP 5xx
    #[error("server error")]
    ServerError,
    /// HTTP 4xx other than 429 (bad key, bad request, unknown model)
    #[error("client error")]
    ClientError,
    /// Connection refused, DNS, TLS
    #[error("network error")]
    NetworkError,
    /// Transport-level timeout
    #[error("timeout")]
    Timeout,
    /// Success status but an unreadable body
    #[error("parse error")]
    ParseError,
}

/// An upstream model error with the provider's detail message.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
}

impl LlmError {
    fn new(kind: LlmErrorKind, message: String, status_code: Option<u16>) -> Self {
        Self {
            kind,
            message,
            status_code,
        }
    }

    pub fn rate_limited(message: String) -> Self {
        Self::new(LlmErrorKind::RateLimited, message, Some(429))
    }

    pub fn server_error(status: u16, message: String) -> Self {
        Self::new(LlmErrorKind::ServerError, message, Some(status))
    }

    pub fn client_error(status: u16, message: String) -> Self {
        Self::new(LlmErrorKind::ClientError, message, Some(status))
    }

    pub fn network_error(message: String) -> Self {
        Self::new(LlmErrorKind::NetworkError, message, None)
    }

    pub fn timeout(message: String) -> Self {
        Self::new(LlmErrorKind::Timeout, message, None)
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(LlmErrorKind::ParseError, message, None)
    }

    /// Build an error from a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = extract_error_detail(body);
        match classify_http_status(status) {
            LlmErrorKind::RateLimited => Self::rate_limited(detail),
            LlmErrorKind::ClientError => Self::client_error(status, detail),
            _ => Self::server_error(status, detail),
        }
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Pull the provider's message out of an error body.
///
/// Understands `{"error": {"message": ...}}` and `{"error": "..."}`; falls
/// back to the raw body.
pub fn extract_error_detail(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().and_then(|v| {
        let error = v.get("error")?;
        error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .map(str::to_string)
    });

    match detail {
        Some(message) => message,
        None if body.trim().is_empty() => "empty response body".to_string(),
        None => body.trim().to_string(),
    }
}
