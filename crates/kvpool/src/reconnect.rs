//! Reconnection policy for cache client handles
//!
//! Client handles produced by a [`ConnectionFactory`](crate::ConnectionFactory)
//! carry a [`ReconnectPolicy`]: a finite number of retries, a capped
//! exponential backoff between them, and a timeout on every attempt.
//!
//! # Example
//!
//! ```ignore
//! use kvpool::reconnect::{BackoffStrategy, ReconnectPolicy};
//! use std::time::Duration;
//!
//! let policy = ReconnectPolicy::new(3, BackoffStrategy::new(100, 3_000))
//!     .with_connect_timeout(Duration::from_secs(10));
//!
//! let session = policy.run("redis connect", || client.open()).await?;
//! ```

mod backoff;
mod policy;

#[cfg(test)]
mod tests;

pub use backoff::BackoffStrategy;
pub use policy::ReconnectPolicy;
