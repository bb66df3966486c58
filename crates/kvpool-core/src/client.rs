//! Client handle trait and connection identity

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Unique identity of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A session handle to the remote key-value cache service.
///
/// The pool treats the handle as opaque: it only ever connects it, asks
/// whether it is ready, and closes it. Drivers add their own command API on
/// the concrete type, which callers reach through the pool's executor.
#[async_trait]
pub trait CacheClient: Send + Sync + 'static {
    /// Get the driver name (e.g., "redis")
    fn driver_name(&self) -> &str;

    /// Identity assigned by the pool when the handle was created
    fn id(&self) -> ConnectionId;

    /// Establish, or re-establish, the session.
    ///
    /// Implementations apply their own reconnection policy and connect
    /// timeout, and return an error once that policy is exhausted.
    async fn connect(&self) -> Result<()>;

    /// Whether the session is open and usable right now
    fn is_ready(&self) -> bool;

    /// Close the session. Must be idempotent.
    async fn close(&self) -> Result<()>;

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }
}
