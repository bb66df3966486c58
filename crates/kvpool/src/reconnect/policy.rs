//! Bounded retry with backoff and per-attempt timeout

use std::future::Future;
use std::time::Duration;

use kvpool_core::{PoolError, Result};
use serde::{Deserialize, Serialize};

use super::BackoffStrategy;

/// How a client handle (re)establishes its session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Retries after the first attempt (0 = a single attempt)
    max_retries: u32,
    /// Delay between attempts
    backoff: BackoffStrategy,
    /// Timeout applied to each attempt, in milliseconds
    connect_timeout_ms: u64,
}

impl ReconnectPolicy {
    /// Create a policy with the default 10 second connect timeout
    pub fn new(max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_retries,
            backoff,
            connect_timeout_ms: 10_000,
        }
    }

    /// Set the per-attempt connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Run `attempt` until it succeeds or the retry budget is spent.
    ///
    /// Each attempt is bounded by the connect timeout; a timed-out attempt
    /// counts as a failure. The last failure is returned, with a timeout
    /// reported as [`PoolError::Timeout`].
    pub async fn run<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tries = 0u32;
        loop {
            let error = match tokio::time::timeout(self.connect_timeout(), attempt()).await {
                Ok(Ok(value)) => {
                    if tries > 0 {
                        tracing::info!(what, attempts = tries + 1, "reconnected");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => PoolError::Timeout(format!(
                    "{} did not complete within {:?}",
                    what,
                    self.connect_timeout()
                )),
            };

            if tries >= self.max_retries {
                tracing::warn!(what, attempts = tries + 1, error = %error, "giving up after retries");
                return Err(error);
            }

            let delay = self.backoff.calculate_delay(tries);
            tracing::debug!(
                what,
                attempt = tries + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            tries += 1;
        }
    }
}

impl Default for ReconnectPolicy {
    /// Default policy: 3 retries, 100ms..3s backoff, 10 second connect timeout
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}
