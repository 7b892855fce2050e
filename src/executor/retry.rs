//! Retry/backoff policy for the Graph batch path.
//!
//! REST and CSOM surface their failures during decode; only Graph
//! sub-batches come back flagged "retry needed". The wait between attempts
//! is a cancellable async sleep so unrelated batches keep making progress.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Delay before re-sending after the given 0-based attempt:
    /// `base * 2^attempt` when incremental, a constant base otherwise,
    /// always capped at the configured maximum.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay.as_millis() as u64;
        let factor = if self.config.incremental {
            1u64.checked_shl(attempt).unwrap_or(u64::MAX)
        } else {
            1
        };
        let delay_ms = base_ms
            .saturating_mul(factor)
            .min(self.config.max_delay.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt is allowed after `attempt` (0-based) failed.
    /// The engine performs at most `max_retries + 1` physical calls.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_retries
    }

    /// Wait out the backoff for the given attempt, aborting early on
    /// cancellation.
    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        let delay = self.delay_for(attempt);
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
