//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of a pool, for health and dashboard endpoints.
///
/// `total` always equals `available + busy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    total: usize,
    available: usize,
    busy: usize,
    max_connections: usize,
    /// Acquirers currently parked at capacity
    waiting: usize,
}

impl PoolStats {
    /// Create a snapshot from the idle and busy counts
    pub fn new(available: usize, busy: usize, max_connections: usize, waiting: usize) -> Self {
        Self {
            total: available + busy,
            available,
            busy,
            max_connections,
            waiting,
        }
    }

    /// Get the total number of connections
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the number of idle connections
    pub fn available(&self) -> usize {
        self.available
    }

    /// Get the number of checked-out connections
    pub fn busy(&self) -> usize {
        self.busy
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Fraction of the connection cap currently checked out (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            self.busy as f64 / self.max_connections as f64
        }
    }

    /// Every permitted connection exists and is checked out
    pub fn is_full(&self) -> bool {
        self.max_connections > 0 && self.busy == self.max_connections
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}
