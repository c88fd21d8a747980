//! Client configuration: credentials, target host and retry behaviour.

use std::time::Duration;

use crate::error::{DuneError, Result};
use crate::transport::RetryPolicy;

/// Production API host.
pub const DEFAULT_HOST: &str = "https://api.dune.com";

/// Default timeout for a single HTTP attempt.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const API_KEY_ENV: &str = "DUNE_API_KEY";
pub const HOST_ENV: &str = "DUNE_API_HOST";

/// Everything a [`DuneClient`](crate::client::DuneClient) needs to talk to the API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    /// Only worth changing to go through a proxy or a test server.
    pub host: String,
    pub retry_policy: RetryPolicy,
    pub timeout: Duration,
}

impl ClientConfig {
    /// Creates a config for the default host.
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            host: DEFAULT_HOST.to_string(),
            retry_policy: RetryPolicy::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Reads `DUNE_API_KEY` (required) and `DUNE_API_HOST` (optional).
    pub fn from_env_vars() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup(API_KEY_ENV).ok_or_else(|| {
            DuneError::config(format!("environment variable {API_KEY_ENV} must be set"))
        })?;
        let config = Self::from_api_key(api_key);
        Ok(match lookup(HOST_ENV) {
            Some(host) => config.with_host(host),
            None => config,
        })
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Endpoint URLs, resolved once from the configured host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    host: String,
}

impl Endpoints {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// POST /api/v1/query/{query_id}/execute
    pub fn execute_query(&self, query_id: i64) -> String {
        format!("{}/api/v1/query/{}/execute", self.host, query_id)
    }

    /// POST /api/v1/sql/execute
    pub fn execute_sql(&self) -> String {
        format!("{}/api/v1/sql/execute", self.host)
    }

    /// GET /api/v1/execution/{execution_id}/status
    pub fn execution_status(&self, execution_id: &str) -> String {
        format!("{}/api/v1/execution/{}/status", self.host, execution_id)
    }

    /// GET /api/v1/execution/{execution_id}/results
    pub fn execution_results(&self, execution_id: &str) -> String {
        format!("{}/api/v1/execution/{}/results", self.host, execution_id)
    }

    /// GET /api/v1/execution/{execution_id}/results/csv
    pub fn execution_results_csv(&self, execution_id: &str) -> String {
        format!("{}/api/v1/execution/{}/results/csv", self.host, execution_id)
    }

    /// GET /api/v1/query/{query_id}/results
    pub fn query_results(&self, query_id: i64) -> String {
        format!("{}/api/v1/query/{}/results", self.host, query_id)
    }

    /// GET /api/v1/query/{query_id}/results/csv
    pub fn query_results_csv(&self, query_id: i64) -> String {
        format!("{}/api/v1/query/{}/results/csv", self.host, query_id)
    }

    /// POST /api/v1/execution/{execution_id}/cancel
    pub fn cancel_execution(&self, execution_id: &str) -> String {
        format!("{}/api/v1/execution/{}/cancel", self.host, execution_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, DuneError::Config(_)));
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn test_host_defaults_and_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[(API_KEY_ENV, "key")])).unwrap();
        assert_eq!(config.api_key, "key");
        assert_eq!(config.host, DEFAULT_HOST);

        let config = ClientConfig::from_lookup(lookup(&[
            (API_KEY_ENV, "key"),
            (HOST_ENV, "http://localhost:8080"),
        ]))
        .unwrap();
        assert_eq!(config.host, "http://localhost:8080");
    }

    #[test]
    fn test_endpoints_trim_trailing_slash() {
        let endpoints = Endpoints::new("https://api.dune.com/");
        assert_eq!(
            endpoints.execute_query(42),
            "https://api.dune.com/api/v1/query/42/execute"
        );
        assert_eq!(
            endpoints.execution_results("01ABC"),
            "https://api.dune.com/api/v1/execution/01ABC/results"
        );
        assert_eq!(
            endpoints.query_results_csv(7),
            "https://api.dune.com/api/v1/query/7/results/csv"
        );
        assert_eq!(endpoints.execute_sql(), "https://api.dune.com/api/v1/sql/execute");
    }
}
