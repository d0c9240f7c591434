//! Client configuration

use std::time::Duration;

/// Default API base URL, overridable via `STRATUS_API_URL`.
pub const DEFAULT_BASE_URL: &str = "https://api.stratus.dev/v1";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the API client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// API base URL (no trailing slash)
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retry tuning for transient failures
    pub retry: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: std::env::var("STRATUS_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create a config from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create a config for a specific API endpoint.
    pub fn new(base_url: &str) -> Self {
        ApiConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry tuning.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Retry tuning for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per attempt
    pub initial_backoff: Duration,
    /// Upper bound on the backoff before jitter
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl RetryConfig {
    /// Retry config without backoff delays, for tests and batch scripts.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ApiConfig::new(DEFAULT_BASE_URL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_config_new_trims_trailing_slash() {
        let config = ApiConfig::new("https://api.example.com/v1/");
        assert_eq!(config.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn test_config_with_timeout() {
        let config = ApiConfig::new(DEFAULT_BASE_URL).with_timeout(Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_retry_config_immediate() {
        let retry = RetryConfig::immediate(5);
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_backoff, Duration::ZERO);
        assert_eq!(retry.max_backoff, Duration::ZERO);
    }
}
