//! Connection pool implementation

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use kvpool_core::{
    CacheClient, ConnectionEvents, ConnectionId, DisconnectReason, EventSink, PoolError, Result,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::PoolConfig;
use super::lease::PooledConnection;
use super::reaper;
use super::registry::{Checkout, Registry, Released, Ticket};
use super::stats::PoolStats;
use crate::factory::ConnectionFactory;


/// State shared by every pool handle, lease, the reaper and the
/// disconnect callbacks.
pub(super) struct Shared<C: CacheClient> {
    pub(super) config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<Client = C>>,
    /// Never held across an `.await`
    pub(super) registry: Mutex<Registry<C>>,
    /// Signalled whenever a connection is returned or capacity frees up
    released: Notify,
    waiting: AtomicUsize,
    shutting_down: AtomicBool,
    initialized: AtomicBool,
    pub(super) cancel: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
    shutdown_lock: tokio::sync::Mutex<()>,
}

impl<C: CacheClient> Shared<C> {
    pub(super) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Check a busy connection back in, returning it if it must be closed
    pub(super) fn check_in(&self, id: ConnectionId, ticket: Ticket) -> Option<Arc<C>> {
        let shutting_down = self.is_shutting_down();
        let outcome = self
            .registry
            .lock()
            .release(id, ticket, Instant::now(), |client| {
                client.is_ready() && !shutting_down
            });

        match outcome {
            Released::NotBusy => {
                tracing::trace!(connection_id = %id, "release of a checkout that already ended ignored");
                None
            }
            Released::Returned => {
                tracing::trace!(connection_id = %id, "connection returned to pool");
                self.released.notify_one();
                None
            }
            Released::Evicted(client) => {
                tracing::debug!(connection_id = %id, "unhealthy connection evicted on release");
                self.released.notify_one();
                Some(client)
            }
        }
    }

    /// Drop a connection from every structure, returning it for closing
    pub(super) fn evict(&self, id: ConnectionId) -> Option<Arc<C>> {
        let client = self.registry.lock().remove(id)?;
        self.released.notify_one();
        Some(client)
    }

    fn stats(&self) -> PoolStats {
        let registry = self.registry.lock();
        PoolStats::new(
            registry.available_len(),
            registry.busy_len(),
            self.config.max_connections(),
            self.waiting.load(Ordering::SeqCst),
        )
    }
}

impl<C: CacheClient> EventSink for Shared<C> {
    fn on_disconnect(&self, id: ConnectionId, reason: DisconnectReason) {
        if let Some(client) = self.evict(id) {
            tracing::warn!(connection_id = %id, reason = %reason, "connection lost, removed from pool");
            spawn_close(client);
        }
    }
}

impl<C: CacheClient> Drop for Shared<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Close a handle, logging rather than returning failures
pub(super) async fn close_quietly<C: CacheClient>(id: ConnectionId, client: &C) {
    if let Err(e) = client.close().await {
        tracing::warn!(connection_id = %id, error = %e, "failed to close connection");
    }
}

/// Close a handle from a synchronous context
pub(super) fn spawn_close<C: CacheClient>(client: Arc<C>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                close_quietly(client.id(), client.as_ref()).await;
            });
        }
        Err(_) => {
            tracing::debug!(connection_id = %client.id(), "no async runtime, dropping connection without close");
        }
    }
}

/// A creation slot held while a connection is being opened.
///
/// Dropped unfulfilled (creation failed, or the acquiring future was
/// cancelled) it returns the slot and wakes one waiter.
struct Reservation<'a, C: CacheClient> {
    shared: &'a Shared<C>,
    pending: bool,
}

impl<'a, C: CacheClient> Reservation<'a, C> {
    /// Take ownership of a slot already counted by `Registry::try_reserve`
    fn new(shared: &'a Shared<C>) -> Self {
        Self {
            shared,
            pending: true,
        }
    }

    /// Register the opened handle as checked out
    ///
    /// Returns `None` once shutdown has begun; the flag is checked under the
    /// registry lock so a concurrent drain cannot miss the handle.
    fn fulfil_busy(mut self, id: ConnectionId, client: &Arc<C>) -> Option<Ticket> {
        let ticket = {
            let mut registry = self.shared.registry.lock();
            (!self.shared.is_shutting_down()).then(|| registry.register_busy(id, client.clone()))
        };
        self.pending = ticket.is_none();
        ticket
    }

    /// Register the opened handle as idle, unless shutdown has begun
    fn fulfil_idle(mut self, id: ConnectionId, client: &Arc<C>) -> bool {
        let registered = {
            let mut registry = self.shared.registry.lock();
            let open = !self.shared.is_shutting_down();
            if open {
                registry.register_idle(id, client.clone(), Instant::now());
            }
            open
        };
        self.pending = !registered;
        if registered {
            self.shared.released.notify_one();
        }
        registered
    }
}

impl<C: CacheClient> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if self.pending {
            self.shared.registry.lock().unreserve();
            self.shared.released.notify_one();
        }
    }
}

/// Counts a parked acquirer for as long as it waits
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A bounded pool of cache client connections.
///
/// The pool is an explicit object: construct it, call
/// [`initialize`](Self::initialize) to warm `min_connections` and start the
/// idle reaper, hand clones to whatever needs cache access, and call
/// [`shutdown`](Self::shutdown) on termination. Clones share one pool.
///
/// Waiters at capacity park on a wait-queue and are woken in arrival order,
/// but a caller arriving while a woken waiter is being scheduled can still
/// take the freed connection first. Strict FIFO handoff is not guaranteed.
pub struct ConnectionPool<C: CacheClient> {
    pub(super) shared: Arc<Shared<C>>,
}

impl<C: CacheClient> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// A pool handle that does not keep the pool alive
pub struct WeakConnectionPool<C: CacheClient> {
    shared: Weak<Shared<C>>,
}

impl<C: CacheClient> WeakConnectionPool<C> {
    /// The pool, if any strong handle to it still exists
    pub fn upgrade(&self) -> Option<ConnectionPool<C>> {
        self.shared.upgrade().map(|shared| ConnectionPool { shared })
    }
}

impl<C: CacheClient> Clone for WeakConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: CacheClient> ConnectionPool<C> {
    /// Create a new pool with the given configuration and factory.
    ///
    /// No connections are opened until [`initialize`](Self::initialize) or
    /// the first [`acquire`](Self::acquire).
    pub fn new<F>(config: PoolConfig, factory: F) -> Result<Self>
    where
        F: ConnectionFactory<Client = C>,
    {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                factory: Arc::new(factory),
                registry: Mutex::new(Registry::new()),
                released: Notify::new(),
                waiting: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                reaper: Mutex::new(None),
                shutdown_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Eagerly open `min_connections` and start the idle reaper.
    ///
    /// Calling it again after a successful run is a no-op. Connections that
    /// did open stay registered even when another one fails; the first
    /// failure is returned.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(PoolError::PoolShutdown);
        }
        if self.shared.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let wanted = {
            let mut registry = self.shared.registry.lock();
            let missing = self
                .shared
                .config
                .min_connections()
                .saturating_sub(registry.total());
            (0..missing)
                .take_while(|_| registry.try_reserve(self.shared.config.max_connections()))
                .count()
        };
        // Each future owns its reservation from the start, so dropping
        // `initialize` before they run still returns every slot.
        let reservations: Vec<_> = (0..wanted)
            .map(|_| Reservation::new(&self.shared))
            .collect();

        let results = join_all(
            reservations
                .into_iter()
                .map(|reservation| self.open_idle(reservation)),
        )
        .await;
        self.start_reaper();

        let mut established = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(_) => established += 1,
                Err(e) => {
                    tracing::error!(error = %e, "failed to open initial connection");
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(established, requested = wanted, "connection pool initialized");

        match first_error {
            Some(e) => {
                self.shared.initialized.store(false, Ordering::SeqCst);
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn start_reaper(&self) {
        let mut slot = self.shared.reaper.lock();
        if slot.is_none() && !self.shared.cancel.is_cancelled() {
            *slot = Some(reaper::spawn(&self.shared));
        }
    }

    /// Check out a connection.
    ///
    /// Reuses the most recently returned idle connection, reconnecting it
    /// once if it went stale; otherwise opens a new one while under
    /// `max_connections`; otherwise waits up to `acquire_timeout` for one to
    /// be released.
    ///
    /// # Errors
    ///
    /// - [`PoolError::PoolShutdown`] once shutdown has begun
    /// - [`PoolError::AcquireTimeout`] when the wait elapses
    /// - [`PoolError::Connection`] when a new connection cannot be opened, or
    ///   too many idle connections in a row turn out to be stale
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        let config = &self.shared.config;
        let started = Instant::now();
        let deadline = started + config.acquire_timeout();
        let mut stale = 0usize;

        loop {
            // Register interest before inspecting state so a release between
            // the check and the wait is not lost.
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_shutting_down() {
                return Err(PoolError::PoolShutdown);
            }

            let checkout = self.shared.registry.lock().checkout(config.max_connections());
            match checkout {
                Checkout::Idle(id, client, ticket) => {
                    // From here the lease owns the checkout; if this future is
                    // dropped mid-reconnect the lease checks the handle back in.
                    let conn = PooledConnection::new(id, ticket, client, self.shared.clone());
                    if conn.is_ready() {
                        return Ok(conn);
                    }

                    tracing::debug!(connection_id = %id, "idle connection not ready, reconnecting");
                    let reconnected = conn.connect().await;
                    match reconnected {
                        Ok(()) => return Ok(conn),
                        Err(e) => {
                            tracing::warn!(connection_id = %id, error = %e, "stale connection could not reconnect, evicting");
                            conn.discard().await;
                            stale += 1;
                            if stale > config.max_stale_retries() {
                                return Err(PoolError::Connection(format!(
                                    "no usable connection after discarding {} stale connections",
                                    stale
                                )));
                            }
                        }
                    }
                }
                Checkout::Create => {
                    let reservation = Reservation::new(&self.shared);
                    return self.open_busy(reservation).await;
                }
                Checkout::Exhausted => {
                    let woke = {
                        let _waiting = Waiting::enter(&self.shared.waiting);
                        tokio::time::timeout_at(deadline, notified).await
                    };

                    if woke.is_err() {
                        let waited = started.elapsed();
                        tracing::debug!(waited_ms = waited.as_millis() as u64, "acquire timed out at capacity");
                        return Err(PoolError::AcquireTimeout { waited });
                    }
                }
            }
        }
    }

    /// Open a connection against `reservation` and hand it out checked out
    async fn open_busy(&self, reservation: Reservation<'_, C>) -> Result<PooledConnection<C>> {
        let (id, client) = self.open().await?;
        match reservation.fulfil_busy(id, &client) {
            Some(ticket) => {
                tracing::debug!(connection_id = %id, "connection opened");
                Ok(PooledConnection::new(id, ticket, client, self.shared.clone()))
            }
            None => {
                close_quietly(id, client.as_ref()).await;
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Open a connection against `reservation` and park it on the idle stack
    async fn open_idle(&self, reservation: Reservation<'_, C>) -> Result<()> {
        let (id, client) = self.open().await?;
        if reservation.fulfil_idle(id, &client) {
            tracing::debug!(connection_id = %id, "idle connection opened");
            Ok(())
        } else {
            close_quietly(id, client.as_ref()).await;
            Err(PoolError::PoolShutdown)
        }
    }

    /// Create and connect a handle. The registry is not touched; the
    /// caller's reservation covers the slot until the handle is registered.
    async fn open(&self) -> Result<(ConnectionId, Arc<C>)> {
        let id = ConnectionId::new();
        let sink: Weak<dyn EventSink> = Arc::downgrade(&self.shared) as Weak<dyn EventSink>;
        let events = ConnectionEvents::new(id, sink);

        let client = Arc::new(
            self.shared
                .factory
                .create(events)
                .await
                .map_err(creation_error)?,
        );

        if let Err(e) = client.connect().await {
            tracing::warn!(connection_id = %id, error = %e, "failed to open connection");
            close_quietly(id, client.as_ref()).await;
            return Err(creation_error(e));
        }

        Ok((id, client))
    }

    /// Check a connection back in.
    ///
    /// Same as [`PooledConnection::release`]. Healthy connections go back on
    /// the idle stack; broken ones, or any connection once shutdown has
    /// begun, are closed and forgotten.
    pub async fn release(&self, conn: PooledConnection<C>) {
        conn.release().await;
    }

    /// Run one idle sweep now, returning how many connections were evicted
    pub async fn reap_idle(&self) -> usize {
        reaper::sweep(&self.shared).await
    }

    /// Drain and close every connection and refuse further acquisitions.
    ///
    /// Safe to call repeatedly and concurrently; later calls wait for an
    /// in-progress drain and then find nothing left to close. Close failures
    /// are logged, never returned.
    pub async fn shutdown(&self) {
        let _guard = self.shared.shutdown_lock.lock().await;

        if !self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::info!("shutting down connection pool");
        }

        self.shared.cancel.cancel();
        let reaper = self.shared.reaper.lock().take();
        if let Some(handle) = reaper {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "idle reaper task failed");
                }
            }
        }

        // Parked acquirers wake, observe the flag and fail.
        self.shared.released.notify_waiters();

        let drained = self.shared.registry.lock().drain();
        if drained.is_empty() {
            return;
        }

        let outcomes = join_all(drained.iter().map(|(id, client)| async move {
            let result = client.close().await;
            if let Err(e) = &result {
                tracing::warn!(connection_id = %id, error = %e, "failed to close connection during shutdown");
            }
            result.is_ok()
        }))
        .await;

        let closed = outcomes.iter().filter(|ok| **ok).count();
        tracing::info!(
            closed,
            failed = outcomes.len() - closed,
            "connection pool shut down"
        );
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Whether [`shutdown`](Self::shutdown) has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    pub fn downgrade(&self) -> WeakConnectionPool<C> {
        WeakConnectionPool {
            shared: Arc::downgrade(&self.shared),
        }
    }

    #[cfg(test)]
    pub(super) fn is_consistent(&self) -> bool {
        self.shared.registry.lock().is_consistent()
    }

    #[cfg(test)]
    pub(super) fn is_busy(&self, id: ConnectionId) -> bool {
        self.shared.registry.lock().is_busy(id)
    }

    #[cfg(test)]
    pub(super) fn is_available(&self, id: ConnectionId) -> bool {
        self.shared.registry.lock().is_available(id)
    }

    #[cfg(test)]
    pub(super) fn has_reaper(&self) -> bool {
        self.shared.reaper.lock().is_some()
    }
}

/// Failures while opening a connection surface as connection errors
fn creation_error(error: PoolError) -> PoolError {
    if error.is_connection_error() {
        error
    } else {
        PoolError::Connection(error.to_string())
    }
}
