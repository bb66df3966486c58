//! Pool configuration types

use std::time::Duration;

use kvpool_core::{PoolError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls pool sizing, timeouts, and the idle reaper cadence. Every field
/// has a default, so a partial TOML/JSON table deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard cap on connections owned by the pool (idle + busy)
    max_connections: usize,
    /// Connections created eagerly and never reaped
    min_connections: usize,
    /// Timeout in milliseconds when waiting for a connection at capacity
    acquire_timeout_ms: u64,
    /// Idle time in milliseconds after which a connection may be reaped
    idle_timeout_ms: u64,
    /// Period in milliseconds between idle reaper sweeps
    reap_interval_ms: u64,
    /// Stale idle connections an acquire may discard before giving up
    max_stale_retries: Option<usize>,
}

impl PoolConfig {
    /// Create a new pool configuration with the given min and max sizes
    ///
    /// Sizes are checked by [`PoolConfig::validate`], which the pool runs on
    /// construction.
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        Self {
            min_connections,
            max_connections,
            ..Self::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: usize) -> Self {
        self.min_connections = min_connections;
        self
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the reaper period in milliseconds
    pub fn with_reap_interval_ms(mut self, interval_ms: u64) -> Self {
        self.reap_interval_ms = interval_ms;
        self
    }

    /// Set how many stale idle connections one acquire may discard
    pub fn with_max_stale_retries(mut self, retries: usize) -> Self {
        self.max_stale_retries = Some(retries);
        self
    }

    /// Check sizing and timing constraints
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.reap_interval_ms == 0 {
            return Err(PoolError::Configuration(
                "reap_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn min_connections(&self) -> usize {
        self.min_connections
    }

    /// Get the acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the reaper period as a Duration
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Stale-connection retry budget, defaulting to `max_connections`
    pub fn max_stale_retries(&self) -> usize {
        self.max_stale_retries.unwrap_or(self.max_connections)
    }
}

impl Default for PoolConfig {
    /// Defaults:
    /// - max_connections: 5
    /// - min_connections: 1
    /// - acquire_timeout: 3 seconds
    /// - idle_timeout: 2 minutes
    /// - reap_interval: 1 minute
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_ms: 3_000,
            idle_timeout_ms: 120_000,
            reap_interval_ms: 60_000,
            max_stale_retries: None,
        }
    }
}
