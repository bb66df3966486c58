//! Redis client handle managed by the pool

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use kvpool::ReconnectPolicy;
use kvpool_core::{CacheClient, ConnectionEvents, ConnectionId, PoolError, Result};
use parking_lot::{Mutex, RwLock};
use redis::aio::MultiplexedConnection;
use redis::{
    AsyncConnectionConfig, Cmd, FromRedisValue, PushInfo, PushKind, RedisError, ToRedisArgs,
};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;

/// Connection state shared between a handle and its disconnect watcher
pub(crate) struct Session {
    connection: RwLock<Option<MultiplexedConnection>>,
    /// Bumped on every successful connect
    epoch: AtomicU64,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            connection: RwLock::new(None),
            epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Install a fresh connection, returning its epoch
    fn install(&self, connection: MultiplexedConnection) -> u64 {
        let mut slot = self.connection.write();
        *slot = Some(connection);
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Start a new epoch with no connection, as a reconnect would
    #[cfg(test)]
    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Forget the connection of `epoch` if it is still the current one.
    ///
    /// Returns false when the handle was closed or has since reconnected,
    /// in which case the loss is not reported.
    fn lose(&self, epoch: u64) -> bool {
        let mut slot = self.connection.write();
        if self.closed.load(Ordering::Acquire) || self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        slot.take();
        true
    }

    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.connection.write().take();
        first
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_ready(&self) -> bool {
        !self.is_closed() && self.connection.read().is_some()
    }
}

/// Watch a connection's push channel and report when its transport goes away.
///
/// The driver sends a `Disconnection` push when the socket drops; the
/// channel closing means its driver task has ended, which is treated the
/// same way.
pub(crate) fn watch_disconnects(
    session: Arc<Session>,
    events: ConnectionEvents,
    epoch: u64,
    mut pushes: UnboundedReceiver<PushInfo>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(push) = pushes.recv().await {
            if matches!(push.kind, PushKind::Disconnection) {
                break;
            }
        }

        if session.lose(epoch) {
            tracing::debug!(connection_id = %events.id(), "Redis server dropped the connection");
            events.closed();
        }
    })
}

/// A single Redis connection as seen by the pool.
///
/// Created unconnected by [`crate::RedisFactory`]; `connect` opens a
/// multiplexed async connection and verifies it with `PING`. A dropped
/// socket, or a transport failure seen while running a command, marks the
/// handle not ready and reports through the pool's [`ConnectionEvents`].
pub struct RedisClient {
    id: ConnectionId,
    client: redis::Client,
    policy: ReconnectPolicy,
    events: ConnectionEvents,
    session: Arc<Session>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl RedisClient {
    pub fn new(client: redis::Client, policy: ReconnectPolicy, events: ConnectionEvents) -> Self {
        Self {
            id: events.id(),
            client,
            policy,
            events,
            session: Arc::new(Session::new()),
            watcher: Mutex::new(None),
        }
    }

    /// Run an arbitrary command on this connection
    pub async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut connection = self.live_connection()?;
        match cmd.query_async(&mut connection).await {
            Ok(value) => Ok(value),
            Err(e) if is_transport_error(&e) => {
                self.session.connection.write().take();
                self.events.error(e.to_string());
                Err(PoolError::Connection(format!("Redis transport failed: {}", e)))
            }
            Err(e) => Err(PoolError::Command(e.to_string())),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let pong: String = self.query(&redis::cmd("PING")).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(PoolError::Command(format!("unexpected PING reply: {}", pong)))
        }
    }

    pub async fn get<T: FromRedisValue>(&self, key: &str) -> Result<Option<T>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    pub async fn set<V: ToRedisArgs>(&self, key: &str, value: V) -> Result<()> {
        self.query(redis::cmd("SET").arg(key).arg(value)).await
    }

    /// `SET key value EX ttl`
    pub async fn set_ex<V: ToRedisArgs>(&self, key: &str, value: V, ttl_secs: u64) -> Result<()> {
        self.query(redis::cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs))
            .await
    }

    /// Delete a key, returning whether it existed
    pub async fn del(&self, key: &str) -> Result<bool> {
        let removed: u64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    fn live_connection(&self) -> Result<MultiplexedConnection> {
        if self.session.is_closed() {
            return Err(PoolError::Connection("Redis connection is closed".into()));
        }
        self.session
            .connection
            .read()
            .clone()
            .ok_or_else(|| PoolError::Connection("Redis connection is not established".into()))
    }

    async fn open(&self) -> Result<(MultiplexedConnection, UnboundedReceiver<PushInfo>)> {
        let (pushes, received) = unbounded_channel();
        let config = AsyncConnectionConfig::new().set_push_sender(pushes);
        let mut connection = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(connect_error)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(connect_error)?;
        if pong != "PONG" {
            tracing::warn!(connection_id = %self.id, reply = %pong, "unexpected PING reply");
        }

        Ok((connection, received))
    }

    fn stop_watcher(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }
}

#[async_trait]
impl CacheClient for RedisClient {
    fn driver_name(&self) -> &str {
        "redis"
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    #[tracing::instrument(skip(self))]
    async fn connect(&self) -> Result<()> {
        if self.session.is_closed() {
            return Err(PoolError::Connection(
                "cannot connect a closed Redis handle".into(),
            ));
        }

        let (connection, pushes) = self.policy.run("redis connect", || self.open()).await?;

        // close() may have raced the handshake
        if self.session.is_closed() {
            return Err(PoolError::Connection(
                "Redis handle closed while connecting".into(),
            ));
        }

        let epoch = self.session.install(connection);
        let watcher = watch_disconnects(self.session.clone(), self.events.clone(), epoch, pushes);
        if let Some(previous) = self.watcher.lock().replace(watcher) {
            previous.abort();
        }

        tracing::debug!(connection_id = %self.id, "Redis connection established");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last multiplexed handle stops its driver task
        if self.session.close() {
            tracing::debug!(connection_id = %self.id, "Redis connection closed");
        }
        self.stop_watcher();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

impl Drop for RedisClient {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("id", &self.id)
            .field("ready", &self.is_ready())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn is_transport_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn connect_error(e: RedisError) -> PoolError {
    let message = e.to_string();
    if e.is_timeout() {
        PoolError::Timeout(format!("Redis connect timed out: {}", message))
    } else if e.kind() == redis::ErrorKind::AuthenticationFailed
        || message.contains("NOAUTH")
        || message.contains("WRONGPASS")
    {
        PoolError::Connection(format!("Redis authentication failed: {}", message))
    } else {
        PoolError::Connection(format!("Failed to connect to Redis: {}", message))
    }
}
