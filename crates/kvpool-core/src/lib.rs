//! kvpool Core - Core abstractions shared by the pool and its client drivers
//!
//! This crate defines the pieces every other kvpool crate agrees on:
//!
//! - `CacheClient` - The opaque, connectable/closeable handle the pool manages
//! - `ConnectionId` - Identity of a pooled handle
//! - `ConnectionEvents` - Failure/close callbacks wired into each handle
//! - `PoolError` - The error taxonomy surfaced to callers

mod client;
mod error;
mod events;

pub use client::*;
pub use error::*;
pub use events::*;
