//! Engine configuration.
//!
//! Size caps and retry knobs are tuning defaults observed in production,
//! not protocol-mandated constants; every limit here can be overridden.

use std::time::Duration;

/// Retry/backoff settings for the Graph batch path.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt. The engine therefore
    /// performs at most `max_retries + 1` physical calls per sub-batch.
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// When set, delay doubles each attempt (`base * 2^attempt`);
    /// otherwise every wait uses the base delay.
    pub incremental: bool,
    /// Upper bound applied to any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            incremental: true,
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }
    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum requests per physical REST `$batch` call.
    pub rest_batch_size: usize,
    /// Maximum requests per physical Graph `$batch` call.
    pub graph_batch_size: usize,
    /// Maximum operations per physical CSOM `ProcessQuery` call.
    pub csom_batch_size: usize,
    /// Base URL of the Graph service (version segment appended per call).
    pub graph_endpoint: String,
    /// HTTP statuses treated as transient throttling on the Graph path.
    pub retryable_statuses: Vec<u16>,
    pub retry: RetryConfig,
    /// HTTP timeout applied by the default transport.
    pub http_timeout: Duration,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rest_batch_size: 100,
            graph_batch_size: 20,
            csom_batch_size: 50,
            graph_endpoint: "https://graph.microsoft.com".to_string(),
            retryable_statuses: vec![429, 502, 503, 504],
            retry: RetryConfig::default(),
            http_timeout: Duration::from_secs(30),
            user_agent: concat!("batchmux/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rest_batch_size(mut self, cap: usize) -> Self {
        self.rest_batch_size = cap;
        self
    }

    pub fn with_graph_batch_size(mut self, cap: usize) -> Self {
        self.graph_batch_size = cap;
        self
    }

    pub fn with_csom_batch_size(mut self, cap: usize) -> Self {
        self.csom_batch_size = cap;
        self
    }

    pub fn with_graph_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.graph_endpoint = endpoint.into();
        self
    }

    pub fn with_retryable_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_caps_match_tuning_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.rest_batch_size, 100);
        assert_eq!(cfg.graph_batch_size, 20);
        assert_eq!(cfg.csom_batch_size, 50);
        assert!(cfg.is_retryable_status(429));
        assert!(!cfg.is_retryable_status(404));
    }

    #[test]
    fn builder_overrides() {
        let cfg = EngineConfig::new()
            .with_rest_batch_size(2)
            .with_graph_batch_size(3)
            .with_retry(RetryConfig::new().with_max_retries(1).with_incremental(false));
        assert_eq!(cfg.rest_batch_size, 2);
        assert_eq!(cfg.graph_batch_size, 3);
        assert_eq!(cfg.retry.max_retries, 1);
        assert!(!cfg.retry.incremental);
    }
}
