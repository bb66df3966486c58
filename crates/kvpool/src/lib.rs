//! kvpool - Connection pooling for a remote key-value cache service
//!
//! The cache service enforces a hard cap on concurrent client connections.
//! This crate hands out connections under that cap, recovers from broken
//! ones, evicts long-idle ones above a reserved minimum, and drains
//! everything on process termination.

mod factory;
pub mod pool;
pub mod reconnect;
pub mod shutdown;

pub use factory::ConnectionFactory;
pub use kvpool_core::{
    CacheClient, ConnectionEvents, ConnectionId, DisconnectReason, PoolError, Result,
};
pub use pool::{
    ConnectionPool, Operation, PoolConfig, PoolStats, PooledConnection, WeakConnectionPool,
};
pub use reconnect::{BackoffStrategy, ReconnectPolicy};
