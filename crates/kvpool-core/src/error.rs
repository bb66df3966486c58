//! Error types for kvpool

use std::time::Duration;

use thiserror::Error;

/// Core error type for pool and client operations
#[derive(Error, Debug)]
pub enum PoolError {
    /// A connection could not be created or (re)established
    #[error("Connection error: {0}")]
    Connection(String),

    /// No connection became available before the acquire deadline
    #[error("Timed out waiting for a pooled connection after {waited:?}")]
    AcquireTimeout { waited: Duration },

    /// The pool has begun shutting down and refuses new acquisitions
    #[error("Connection pool is shutting down")]
    PoolShutdown,

    /// A caller-supplied operation failed
    #[error("Operation error: {0}")]
    Operation(String),

    /// Connecting to the cache service exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The cache service rejected a command
    #[error("Command error: {0}")]
    Command(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PoolError {
    /// Whether the error is the acquire wait running out, as opposed to a
    /// failure to create a connection.
    pub fn is_acquire_timeout(&self) -> bool {
        matches!(self, PoolError::AcquireTimeout { .. })
    }

    /// Whether the error indicates a broken or unreachable connection
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            PoolError::Connection(_) | PoolError::Timeout(_) | PoolError::Io(_)
        )
    }
}

/// Result type alias for kvpool operations
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_timeout_is_distinct_from_connection_error() {
        let timeout = PoolError::AcquireTimeout {
            waited: Duration::from_millis(200),
        };
        let creation = PoolError::Connection("refused".into());

        assert!(timeout.is_acquire_timeout());
        assert!(!timeout.is_connection_error());
        assert!(creation.is_connection_error());
        assert!(!creation.is_acquire_timeout());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            PoolError::PoolShutdown.to_string(),
            "Connection pool is shutting down"
        );
        assert_eq!(
            PoolError::Connection("auth failed".into()).to_string(),
            "Connection error: auth failed"
        );
        let timeout = PoolError::AcquireTimeout {
            waited: Duration::from_millis(200),
        };
        assert!(timeout.to_string().contains("Timed out"));
    }
}
