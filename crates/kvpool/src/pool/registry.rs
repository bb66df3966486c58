//! Bookkeeping for every connection the pool owns

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use kvpool_core::ConnectionId;
use tokio::time::Instant;

/// Identifies one checkout of a connection.
///
/// Check-in must present the ticket issued by the checkout it ends, so a
/// holder whose checkout is over cannot return a connection that has since
/// been handed to someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Ticket(u64);

struct IdleEntry {
    id: ConnectionId,
    idle_since: Instant,
}

/// Outcome of asking the registry for a connection
pub(super) enum Checkout<C> {
    /// An idle connection, already moved to the busy set
    Idle(ConnectionId, Arc<C>, Ticket),
    /// No idle connection, but a creation slot was reserved
    Create,
    /// At capacity with nothing idle
    Exhausted,
}

/// Outcome of checking a connection back in
pub(super) enum Released<C> {
    /// The id was not checked out under that ticket; nothing changed
    NotBusy,
    /// Back on the idle stack
    Returned,
    /// Dropped from the registry; the caller must close it
    Evicted(Arc<C>),
}

/// The set of live connections, partitioned into available and busy.
///
/// `available` is a stack: checkout pops the most recently returned entry,
/// and the oldest entries sit at the bottom where the reaper finds them.
/// Slots being created are counted in `reserved` so that
/// `connections + reserved` never exceeds the cap.
pub(super) struct Registry<C> {
    connections: HashMap<ConnectionId, Arc<C>>,
    available: Vec<IdleEntry>,
    busy: HashMap<ConnectionId, Ticket>,
    reserved: usize,
    next_ticket: u64,
}

impl<C> Registry<C> {
    pub(super) fn new() -> Self {
        Self {
            connections: HashMap::new(),
            available: Vec::new(),
            busy: HashMap::new(),
            reserved: 0,
            next_ticket: 0,
        }
    }

    pub(super) fn checkout(&mut self, max_connections: usize) -> Checkout<C> {
        while let Some(entry) = self.available.pop() {
            // Entries always have a matching connection; skip defensively if not.
            let Some(client) = self.connections.get(&entry.id) else {
                continue;
            };
            let client = client.clone();
            let ticket = self.mark_busy(entry.id);
            return Checkout::Idle(entry.id, client, ticket);
        }

        if self.try_reserve(max_connections) {
            Checkout::Create
        } else {
            Checkout::Exhausted
        }
    }

    /// Reserve a creation slot if the cap allows it
    pub(super) fn try_reserve(&mut self, max_connections: usize) -> bool {
        if self.connections.len() + self.reserved < max_connections {
            self.reserved += 1;
            true
        } else {
            false
        }
    }

    /// Give back a reservation whose creation failed
    pub(super) fn unreserve(&mut self) {
        self.reserved = self.reserved.saturating_sub(1);
    }

    /// Register a freshly connected handle as checked out
    pub(super) fn register_busy(&mut self, id: ConnectionId, client: Arc<C>) -> Ticket {
        self.unreserve();
        self.connections.insert(id, client);
        self.mark_busy(id)
    }

    fn mark_busy(&mut self, id: ConnectionId) -> Ticket {
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.busy.insert(id, ticket);
        ticket
    }

    /// Register a freshly connected handle as idle
    pub(super) fn register_idle(&mut self, id: ConnectionId, client: Arc<C>, now: Instant) {
        self.unreserve();
        self.connections.insert(id, client);
        self.available.push(IdleEntry {
            id,
            idle_since: now,
        });
    }

    /// Check a connection back in.
    ///
    /// Ignored unless `id` is checked out under `ticket`. `reusable` decides
    /// whether it goes back on the idle stack or is evicted.
    pub(super) fn release(
        &mut self,
        id: ConnectionId,
        ticket: Ticket,
        now: Instant,
        reusable: impl FnOnce(&C) -> bool,
    ) -> Released<C> {
        if self.busy.get(&id) != Some(&ticket) {
            return Released::NotBusy;
        }
        self.busy.remove(&id);

        let keep = match self.connections.get(&id) {
            Some(client) => reusable(client),
            None => return Released::NotBusy,
        };

        if keep {
            self.available.push(IdleEntry {
                id,
                idle_since: now,
            });
            Released::Returned
        } else {
            match self.connections.remove(&id) {
                Some(client) => Released::Evicted(client),
                None => Released::NotBusy,
            }
        }
    }

    /// Remove a connection from every structure
    pub(super) fn remove(&mut self, id: ConnectionId) -> Option<Arc<C>> {
        let client = self.connections.remove(&id)?;
        self.busy.remove(&id);
        self.available.retain(|entry| entry.id != id);
        Some(client)
    }

    /// Remove idle connections older than `idle_timeout`, oldest first,
    /// leaving at least `min_idle` on the idle stack.
    pub(super) fn take_expired(
        &mut self,
        now: Instant,
        idle_timeout: Duration,
        min_idle: usize,
    ) -> Vec<(ConnectionId, Arc<C>)> {
        let mut expired: Vec<(ConnectionId, Instant)> = self
            .available
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.idle_since) > idle_timeout)
            .map(|entry| (entry.id, entry.idle_since))
            .collect();
        expired.sort_by_key(|(_, idle_since)| *idle_since);

        let mut evicted = Vec::new();
        for (id, _) in expired {
            if self.available.len() <= min_idle {
                break;
            }
            if let Some(client) = self.remove(id) {
                evicted.push((id, client));
            }
        }
        evicted
    }

    /// Empty every structure, handing back all handles for closing
    pub(super) fn drain(&mut self) -> Vec<(ConnectionId, Arc<C>)> {
        self.available.clear();
        self.busy.clear();
        self.reserved = 0;
        self.connections.drain().collect()
    }

    pub(super) fn total(&self) -> usize {
        self.connections.len()
    }

    pub(super) fn available_len(&self) -> usize {
        self.available.len()
    }

    pub(super) fn busy_len(&self) -> usize {
        self.busy.len()
    }

    pub(super) fn is_busy(&self, id: ConnectionId) -> bool {
        self.busy.contains_key(&id)
    }

    pub(super) fn is_available(&self, id: ConnectionId) -> bool {
        self.available.iter().any(|entry| entry.id == id)
    }

    /// Every tracked connection is exactly one of idle or busy
    pub(super) fn is_consistent(&self) -> bool {
        let idle: HashSet<ConnectionId> = self.available.iter().map(|entry| entry.id).collect();
        idle.len() == self.available.len()
            && idle.iter().all(|id| !self.busy.contains_key(id))
            && idle.len() + self.busy.len() == self.connections.len()
            && idle
                .iter()
                .chain(self.busy.keys())
                .all(|id| self.connections.contains_key(id))
    }
}
