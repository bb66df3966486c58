//! Failure and close callbacks wired into every pooled handle

use std::fmt;
use std::sync::Weak;

use crate::ConnectionId;

/// Why a handle reported itself as gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport failed (socket error, protocol error, reconnect exhausted)
    Error(String),
    /// The remote end closed the session
    Closed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Error(message) => write!(f, "error: {}", message),
            DisconnectReason::Closed => f.write_str("closed by peer"),
        }
    }
}

/// Receiver of disconnect notifications, implemented by the pool.
///
/// Implementations must not block and must tolerate ids they no longer
/// track.
pub trait EventSink: Send + Sync {
    fn on_disconnect(&self, id: ConnectionId, reason: DisconnectReason);
}

/// Callbacks handed to a client handle at creation time.
///
/// The handle calls [`ConnectionEvents::error`] or [`ConnectionEvents::closed`]
/// when its transport breaks; the owning pool then drops the handle from every
/// structure it is tracked in. Only a weak reference to the pool is held, so a
/// handle outliving its pool reports into the void.
#[derive(Clone)]
pub struct ConnectionEvents {
    id: ConnectionId,
    sink: Option<Weak<dyn EventSink>>,
}

impl ConnectionEvents {
    pub fn new(id: ConnectionId, sink: Weak<dyn EventSink>) -> Self {
        Self {
            id,
            sink: Some(sink),
        }
    }

    /// Events for a handle that no pool is watching
    pub fn detached(id: ConnectionId) -> Self {
        Self { id, sink: None }
    }

    /// Identity of the handle these events belong to
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Report a transport failure
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(connection_id = %self.id, error = %message, "connection reported error");
        self.dispatch(DisconnectReason::Error(message));
    }

    /// Report that the peer ended the session
    pub fn closed(&self) {
        tracing::debug!(connection_id = %self.id, "connection reported close");
        self.dispatch(DisconnectReason::Closed);
    }

    fn dispatch(&self, reason: DisconnectReason) {
        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.on_disconnect(self.id, reason);
        }
    }
}

impl fmt::Debug for ConnectionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvents")
            .field("id", &self.id)
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(ConnectionId, DisconnectReason)>>,
    }

    impl EventSink for RecordingSink {
        fn on_disconnect(&self, id: ConnectionId, reason: DisconnectReason) {
            self.seen.lock().unwrap().push((id, reason));
        }
    }

    #[test]
    fn test_events_reach_live_sink() {
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn EventSink> = Arc::downgrade(&sink) as Weak<dyn EventSink>;
        let id = ConnectionId::new();
        let events = ConnectionEvents::new(id, weak);

        events.error("socket reset");
        events.closed();

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (id, DisconnectReason::Error("socket reset".into())));
        assert_eq!(seen[1], (id, DisconnectReason::Closed));
    }

    #[test]
    fn test_events_after_sink_dropped_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn EventSink> = Arc::downgrade(&sink) as Weak<dyn EventSink>;
        let events = ConnectionEvents::new(ConnectionId::new(), weak);
        drop(sink);

        events.error("late failure");
    }

    #[test]
    fn test_detached_events() {
        let id = ConnectionId::new();
        let events = ConnectionEvents::detached(id);
        assert_eq!(events.id(), id);
        events.closed();
    }
}
