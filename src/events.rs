//! Watch and session events flowing from a store session to the client's
//! event thread.

use tokio::sync::mpsc;
use tracing::trace;

/// Lifetime states of a store session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Expired,
    Closed,
}

impl SessionState {
    /// States from which the transport may still come back on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Connecting)
    }
}

/// Kind of a path-level watch notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// A single notification produced by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedEvent {
    /// Session-level transition, carries no path
    State(SessionState),
    /// A watched path changed
    Node { path: String, kind: EventKind },
}

impl WatchedEvent {
    pub fn node(
        path: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        WatchedEvent::Node {
            path: path.into(),
            kind,
        }
    }

    pub fn is_state_change(&self) -> bool {
        matches!(self, WatchedEvent::State(_))
    }

    pub fn is_data_change(&self) -> bool {
        matches!(self, WatchedEvent::Node { .. })
    }
}

#[derive(Debug)]
pub(crate) enum Dispatch {
    Event(WatchedEvent),
    Shutdown,
}

/// Sending half of the event thread's queue.
///
/// Handed to a [`crate::ConnectionFactory`] so the session it creates can
/// publish events. Sending never blocks; events are delivered in send order.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publishes an event. Events sent after the event thread stopped are dropped.
    pub fn send(
        &self,
        event: WatchedEvent,
    ) {
        if let Err(e) = self.tx.send(Dispatch::Event(event)) {
            trace!("event thread gone, dropping {:?}", e.0);
        }
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Dispatch::Shutdown);
    }
}
