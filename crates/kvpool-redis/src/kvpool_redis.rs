//! Redis support for kvpool
//!
//! Provides the concrete handle the pool manages when the cache service
//! speaks the Redis protocol: endpoint/credential settings, a client handle
//! over a multiplexed async connection, and the factory that builds
//! unconnected handles for the pool.

mod client;
#[cfg(test)]
mod client_tests;
mod endpoint;
#[cfg(test)]
mod endpoint_tests;
mod factory;

pub use client::*;
pub use endpoint::*;
pub use factory::*;
