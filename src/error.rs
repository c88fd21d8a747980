//! Error types returned by the Dune client.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Rate-limit snapshot parsed from `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the quota resets.
    pub reset: i64,
}

/// A non-2xx response from the API, captured after the transport gave up retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status_code: u16,
    pub status_text: String,
    /// The structured error message when the body carried one, otherwise the
    /// first 1024 bytes of the raw body.
    pub body_snippet: String,
    /// `None` when the response carried no rate-limit headers at all.
    pub rate_limit: Option<RateLimit>,
    /// Delay requested by the server through `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body_snippet.is_empty() {
            write!(f, "http {} {}", self.status_code, self.status_text)
        } else {
            write!(
                f,
                "http {} {}: {}",
                self.status_code, self.status_text, self.body_snippet
            )
        }
    }
}

/// Possible errors encountered by the Dune client
#[derive(Error, Debug)]
pub enum DuneError {
    /// The request never produced a response (connect failure, timeout, broken body).
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("request was not successful: {0}")]
    RequestUnsuccessful(ApiError),

    /// The response decoded fine but broke a state invariant.
    #[error("invalid response: {0}")]
    Validation(String),

    #[error("failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The poller hit its limit of consecutive failed fetches.
    #[error("retries have been exhausted: {source}")]
    RetriesExhausted {
        #[source]
        source: Box<DuneError>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DuneError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the API error behind this error, looking through `RetriesExhausted`.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::RequestUnsuccessful(api) => Some(api),
            Self::RetriesExhausted { source } => source.api_error(),
            _ => None,
        }
    }

    /// Whether trying the same call again later could plausibly succeed.
    ///
    /// Validation and configuration errors point at a contract violation or a
    /// caller mistake, so they are never worth retrying.
    pub fn is_retryable_later(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RetriesExhausted { .. } => true,
            Self::RequestUnsuccessful(api) => {
                api.status_code == 429 || (500..600).contains(&api.status_code)
            }
            Self::Validation(_) | Self::Decode(_) | Self::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DuneError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status_code: u16, body_snippet: &str) -> ApiError {
        ApiError {
            status_code,
            status_text: "Service Unavailable".to_string(),
            body_snippet: body_snippet.to_string(),
            rate_limit: None,
            retry_after: None,
        }
    }

    #[test]
    fn test_api_error_display_with_and_without_snippet() {
        assert_eq!(
            api_error(503, "try later").to_string(),
            "http 503 Service Unavailable: try later"
        );
        assert_eq!(api_error(503, "").to_string(), "http 503 Service Unavailable");
    }

    #[test]
    fn test_retries_exhausted_keeps_cause() {
        let err = DuneError::RetriesExhausted {
            source: Box::new(DuneError::RequestUnsuccessful(api_error(502, "bad gateway"))),
        };
        assert!(err.to_string().contains("bad gateway"));
        assert_eq!(err.api_error().map(|e| e.status_code), Some(502));
        assert!(err.is_retryable_later());
    }

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!DuneError::validation("bad state: FOO").is_retryable_later());
        assert!(!DuneError::RequestUnsuccessful(api_error(400, "")).is_retryable_later());
    }
}
