//! Checked-out connection guard

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use kvpool_core::{CacheClient, ConnectionId};

use super::pool::{Shared, close_quietly, spawn_close};
use super::registry::Ticket;

/// A connection borrowed from the pool
///
/// Call [`release`](Self::release) to check it back in; if the guard is
/// dropped instead, it is checked in on drop and any close it requires runs
/// on a spawned task. The guard is the only way to check a connection in,
/// and it does so at most once.
pub struct PooledConnection<C: CacheClient> {
    id: ConnectionId,
    ticket: Ticket,
    client: Arc<C>,
    shared: Arc<Shared<C>>,
    released: bool,
}

impl<C: CacheClient> PooledConnection<C> {
    pub(super) fn new(
        id: ConnectionId,
        ticket: Ticket,
        client: Arc<C>,
        shared: Arc<Shared<C>>,
    ) -> Self {
        Self {
            id,
            ticket,
            client,
            shared,
            released: false,
        }
    }

    /// Identity of the borrowed connection
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the underlying client as an Arc
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Check the connection back in
    pub async fn release(mut self) {
        self.released = true;
        if let Some(client) = self.shared.check_in(self.id, self.ticket) {
            close_quietly(self.id, client.as_ref()).await;
        }
    }

    /// End the checkout by dropping the connection from the pool and closing it
    pub(super) async fn discard(mut self) {
        self.released = true;
        if let Some(client) = self.shared.evict(self.id) {
            close_quietly(self.id, client.as_ref()).await;
        }
    }

    #[cfg(test)]
    pub(super) fn ticket(&self) -> Ticket {
        self.ticket
    }
}

impl<C: CacheClient> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl<C: CacheClient> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(client) = self.shared.check_in(self.id, self.ticket) {
            spawn_close(client);
        }
    }
}

impl<C: CacheClient> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("driver", &self.client.driver_name())
            .field("released", &self.released)
            .finish()
    }
}
