//! Connection factory trait

use std::sync::Arc;

use async_trait::async_trait;
use kvpool_core::{CacheClient, ConnectionEvents, Result};

/// Factory for creating unconnected client handles.
///
/// `create` must not open the session; the pool calls
/// [`CacheClient::connect`] afterwards and only registers the handle once
/// that succeeds. The handle keeps `events` and reports transport failures
/// through it.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Client: CacheClient;

    /// Create a new, not yet connected handle
    async fn create(&self, events: ConnectionEvents) -> Result<Self::Client>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    type Client = T::Client;

    async fn create(&self, events: ConnectionEvents) -> Result<Self::Client> {
        (**self).create(events).await
    }
}
