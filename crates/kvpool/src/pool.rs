//! Connection pooling for cache client connections
//!
//! The pool keeps every connection it owns in exactly one of two sets:
//! available (idle, reusable, reapable) or busy (checked out). Acquisition
//! reuses the most recently returned idle connection, opens a new one while
//! under the cap, or waits with a deadline. A background reaper closes
//! connections idle for too long, never dropping below the configured
//! minimum.
//!
//! # Example
//!
//! ```ignore
//! use kvpool::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(1, 5)
//!     .with_acquire_timeout_ms(3_000)
//!     .with_idle_timeout_ms(120_000);
//!
//! let pool = ConnectionPool::new(config, factory)?;
//! pool.initialize().await?;
//!
//! let value = pool.execute(|conn| async move { conn.get("key").await }).await;
//!
//! pool.shutdown().await;
//! ```

mod config;
mod executor;
mod lease;
#[allow(clippy::module_inception)]
mod pool;
mod reaper;
mod registry;
mod stats;


pub use config::PoolConfig;
pub use executor::Operation;
pub use lease::PooledConnection;
pub use pool::{ConnectionPool, WeakConnectionPool};
pub use stats::PoolStats;
