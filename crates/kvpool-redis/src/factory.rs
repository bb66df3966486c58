use async_trait::async_trait;
use kvpool::{ConnectionFactory, ConnectionPool, PoolConfig, ReconnectPolicy};
use kvpool_core::{ConnectionEvents, PoolError, Result};

use crate::{RedisClient, RedisEndpoint};

/// Builds unconnected [`RedisClient`] handles for a pool
#[derive(Clone)]
pub struct RedisFactory {
    client: redis::Client,
    policy: ReconnectPolicy,
    endpoint: String,
}

impl RedisFactory {
    /// Parse the endpoint once; every handle shares the resulting client
    pub fn new(endpoint: &RedisEndpoint, policy: ReconnectPolicy) -> Result<Self> {
        let client = redis::Client::open(endpoint.connection_url().as_str()).map_err(|e| {
            PoolError::Configuration(format!(
                "invalid Redis endpoint {}: {}",
                endpoint.redacted_url(),
                e
            ))
        })?;

        Ok(Self {
            client,
            policy,
            endpoint: endpoint.redacted_url(),
        })
    }

    /// The endpoint URL with credentials masked
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

impl std::fmt::Debug for RedisFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFactory")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl ConnectionFactory for RedisFactory {
    type Client = RedisClient;

    async fn create(&self, events: ConnectionEvents) -> Result<RedisClient> {
        tracing::trace!(connection_id = %events.id(), endpoint = %self.endpoint, "creating Redis handle");
        Ok(RedisClient::new(
            self.client.clone(),
            self.policy.clone(),
            events,
        ))
    }
}

/// Build a pool of Redis connections for `endpoint`
pub fn redis_pool(
    config: PoolConfig,
    endpoint: &RedisEndpoint,
    policy: ReconnectPolicy,
) -> Result<ConnectionPool<RedisClient>> {
    ConnectionPool::new(config, RedisFactory::new(endpoint, policy)?)
}
