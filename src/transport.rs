//! Request transport: attaches the API key, retries transient failures with
//! exponential backoff and turns unsuccessful responses into [`ApiError`]s.

use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ApiError, DuneError, RateLimit, Result};
use crate::models::ErrorBody;

/// Header carrying the API key on every request.
pub const API_KEY_HEADER: &str = "X-DUNE-API-KEY";

/// Upper bound on how much of an error body is read into memory.
pub const ERROR_SNIPPET_LIMIT: usize = 1024;

/// Retry configuration for a single logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Cap on the exponential part of the backoff.
    pub max_backoff: Duration,
    /// Fixed delay added on top of every backoff.
    pub jitter: Duration,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            jitter: Duration::from_millis(100),
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `initial * 2^(attempt-1)`, clamped to `max_backoff`, plus `jitter`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_backoff.min(self.max_backoff);
        for _ in 1..attempt {
            delay = delay.saturating_mul(2);
            if delay >= self.max_backoff {
                delay = self.max_backoff;
                break;
            }
        }
        delay.saturating_add(self.jitter)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// The computed backoff, stretched to the server's `Retry-After` when that is longer.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempt);
        match retry_after {
            Some(server) if server > backoff => server,
            _ => backoff,
        }
    }
}

#[derive(Debug, Clone)]
struct RequestBody {
    bytes: Vec<u8>,
    content_type: &'static str,
}

/// Everything needed to (re)build one HTTP request on every attempt.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    method: Method,
    url: String,
    query: Vec<(&'static str, String)>,
    body: Option<RequestBody>,
}

impl PreparedRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn with_query(mut self, query: Vec<(&'static str, String)>) -> Self {
        self.query = query;
        self
    }

    /// Serializes `body` as the JSON payload.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(RequestBody {
            bytes: serde_json::to_vec(body)?,
            content_type: "application/json",
        });
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Sends [`PreparedRequest`]s under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: Client,
    api_key: String,
    policy: RetryPolicy,
}

impl HttpTransport {
    pub fn new(api_key: &str, policy: RetryPolicy, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Performs `request`, retrying connection failures and retryable statuses.
    ///
    /// Returns the first 2xx response. Anything else ends in
    /// [`DuneError::Transport`] (no response at all) or
    /// [`DuneError::RequestUnsuccessful`] once attempts run out or the status
    /// is not retryable.
    pub async fn send(&self, request: &PreparedRequest) -> Result<Response> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(
                method = %request.method,
                url = %request.url,
                attempt,
                max_attempts,
                "sending request"
            );

            let delay = match self.build(request).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let api_error = read_api_error(resp).await;
                    if !self.policy.is_retryable_status(api_error.status_code)
                        || attempt >= max_attempts
                    {
                        return Err(DuneError::RequestUnsuccessful(api_error));
                    }
                    let delay = self.policy.delay_for(attempt, api_error.retry_after);
                    warn!(
                        url = %request.url,
                        attempt,
                        status = api_error.status_code,
                        ?delay,
                        "request unsuccessful, retrying"
                    );
                    delay
                }
                Err(e) => {
                    if e.is_builder() || attempt >= max_attempts {
                        return Err(DuneError::Transport(e));
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(url = %request.url, attempt, ?delay, "failed to send request, retrying: {e}");
                    delay
                }
            };

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn build(&self, request: &PreparedRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .request(request.method.clone(), &request.url)
            .header(API_KEY_HEADER, &self.api_key);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, body.content_type)
                .body(body.bytes.clone());
        }
        builder
    }
}

/// Builds an [`ApiError`] from an unsuccessful response, reading at most
/// [`ERROR_SNIPPET_LIMIT`] bytes of its body.
async fn read_api_error(mut resp: Response) -> ApiError {
    let status = resp.status();
    let rate_limit = parse_rate_limit(resp.headers());
    let retry_after = parse_retry_after(resp.headers());

    let mut snippet = Vec::new();
    while snippet.len() < ERROR_SNIPPET_LIMIT {
        match resp.chunk().await {
            Ok(Some(chunk)) => snippet.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                debug!("failed to read error body: {e}");
                break;
            }
        }
    }
    snippet.truncate(ERROR_SNIPPET_LIMIT);

    ApiError {
        status_code: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        body_snippet: error_message(&snippet),
        rate_limit,
        retry_after,
    }
}

/// The `error` field of a structured error body, or the raw snippet when the
/// body is not one.
pub fn error_message(snippet: &[u8]) -> String {
    match serde_json::from_slice::<ErrorBody>(snippet) {
        Ok(body) if !body.error.is_empty() => body.error,
        _ => String::from_utf8_lossy(snippet).trim().to_string(),
    }
}

const RATE_LIMIT_HEADERS: [&str; 3] = [
    "X-RateLimit-Limit",
    "X-RateLimit-Remaining",
    "X-RateLimit-Reset",
];

/// Parses `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`.
/// Returns `None` when none of them are set; a header that is present but
/// unparseable reads as zero, so an exhausted quota stays distinguishable
/// from a response without rate-limit headers.
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    fn header<T: std::str::FromStr + Default>(headers: &HeaderMap, name: &str) -> T {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or_default()
    }

    if !RATE_LIMIT_HEADERS.iter().any(|name| headers.contains_key(*name)) {
        return None;
    }
    let [limit, remaining, reset] = RATE_LIMIT_HEADERS;
    Some(RateLimit {
        limit: header(headers, limit),
        remaining: header(headers, remaining),
        reset: header(headers, reset),
    })
}

/// Parses a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_backoff_grows_then_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<Duration> = (1..=8).map(|attempt| policy.backoff(attempt)).collect();

        assert_eq!(delays[0], Duration::from_millis(600));
        assert_eq!(delays[1], Duration::from_millis(1100));
        assert_eq!(delays[2], Duration::from_millis(2100));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays
            .iter()
            .all(|d| *d <= policy.max_backoff + policy.jitter));
        assert_eq!(delays[7], policy.max_backoff + policy.jitter);
    }

    #[test]
    fn test_backoff_survives_huge_attempt_numbers() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(u64::MAX / 4),
            max_backoff: Duration::from_secs(u64::MAX / 2),
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(64), policy.max_backoff);
    }

    #[test]
    fn test_uncapped_backoff_with_jitter_saturates() {
        let policy = RetryPolicy {
            max_backoff: Duration::MAX,
            ..RetryPolicy::default()
        };
        assert!(!policy.jitter.is_zero());
        assert_eq!(policy.backoff(80), Duration::MAX);
        assert_eq!(policy.delay_for(80, Some(Duration::from_secs(1))), Duration::MAX);
    }

    #[test]
    fn test_server_retry_after_wins_when_longer() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_millis(10))),
            policy.backoff(1)
        );
        assert_eq!(policy.delay_for(2, None), policy.backoff(2));
    }

    #[test]
    fn test_retryable_statuses() {
        let policy = RetryPolicy::default();
        for code in [429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(code));
        }
        for code in [400, 401, 403, 404, 501] {
            assert!(!policy.is_retryable_status(code));
        }
    }

    #[test]
    fn test_rate_limit_absent_is_none() {
        assert_eq!(parse_rate_limit(&HeaderMap::new()), None);
    }

    #[test]
    fn test_zero_quota_is_not_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-Limit", HeaderValue::from_static("0"));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        headers.insert("X-RateLimit-Reset", HeaderValue::from_static("0"));
        assert_eq!(
            parse_rate_limit(&headers),
            Some(RateLimit {
                limit: 0,
                remaining: 0,
                reset: 0,
            })
        );

        let mut partial = HeaderMap::new();
        partial.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        assert_eq!(
            parse_rate_limit(&partial),
            Some(RateLimit {
                limit: 0,
                remaining: 0,
                reset: 0,
            })
        );
    }

    #[test]
    fn test_rate_limit_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-Limit", HeaderValue::from_static("40"));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        headers.insert("X-RateLimit-Reset", HeaderValue::from_static("1700000000"));
        assert_eq!(
            parse_rate_limit(&headers),
            Some(RateLimit {
                limit: 40,
                remaining: 0,
                reset: 1_700_000_000,
            })
        );
    }

    #[test]
    fn test_retry_after_seconds_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_error_message_prefers_structured_error() {
        assert_eq!(error_message(br#"{"error": "invalid API Key"}"#), "invalid API Key");
        assert_eq!(error_message(b"<html>bad gateway</html>"), "<html>bad gateway</html>");
        assert_eq!(error_message(br#"{"error": ""}"#), r#"{"error": ""}"#);
        assert_eq!(error_message(br#"{"error": "trunc"#), r#"{"error": "trunc"#);
    }

    #[test]
    fn test_prepared_request_json_body() {
        let request = PreparedRequest::post("http://localhost/api/v1/sql/execute")
            .with_json(&serde_json::json!({ "sql": "select 1" }))
            .unwrap();
        assert_eq!(*request.method(), Method::POST);
        assert_eq!(request.url(), "http://localhost/api/v1/sql/execute");
        let body = request.body.as_ref().unwrap();
        assert_eq!(body.content_type, "application/json");
        assert_eq!(body.bytes, br#"{"sql":"select 1"}"#.to_vec());
    }
}
