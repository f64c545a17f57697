//! Event thread: delivers session and watch events to subscribers in the
//! order the store produced them.
//!
//! Listeners run inline on this thread. A listener that blocks stalls
//! every later notification; long work must be handed off.
//!
//! One-shot watches are re-armed before each delivery. When the session is
//! disconnected at that moment, the path is parked and re-armed on the next
//! `Connected` event, and its listeners get a catch-up notification since a
//! change may have gone unwatched in between.

use std::collections::BTreeSet;
use std::io;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Weak;
use std::thread;
use std::thread::JoinHandle;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ChildListener;
use super::ClientInner;
use super::CoordClient;
use super::DataListener;
use super::SessionHandle;
use super::StateListener;
use crate::events::Dispatch;
use crate::path::validate_path;
use crate::Connection;
use crate::Error;
use crate::EventKind;
use crate::Result;
use crate::SessionState;
use crate::WatchedEvent;
use crate::EVENT_THREAD_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Data,
    Child,
}

/// Watches that could not be re-armed while the session was disconnected
#[derive(Debug, Default)]
pub(crate) struct PendingWatches {
    data: BTreeSet<String>,
    child: BTreeSet<String>,
}

impl PendingWatches {
    fn paths(
        &mut self,
        kind: WatchKind,
    ) -> &mut BTreeSet<String> {
        match kind {
            WatchKind::Data => &mut self.data,
            WatchKind::Child => &mut self.child,
        }
    }
}

pub(crate) fn spawn_event_thread(
    client: Weak<ClientInner>,
    mut events: UnboundedReceiver<Dispatch>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(EVENT_THREAD_NAME.to_string())
        .spawn(move || {
            while let Some(Dispatch::Event(event)) = events.blocking_recv() {
                let Some(inner) = client.upgrade() else {
                    break;
                };
                if !inner.lifecycle.is_open() {
                    break;
                }
                trace!("delivering {:?}", event);
                inner.process(event);
            }
            debug!("event thread exiting");
        })
}

/// Runs one listener callback, keeping the event thread alive if it fails.
fn deliver(
    what: &str,
    path: &str,
    callback: impl FnOnce() -> Result<()>,
) {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("{} listener failed on {}: {}", what, path, e),
        Err(_) => error!("{} listener panicked on {}", what, path),
    }
}

fn children_with_watch(
    conn: &dyn Connection,
    path: &str,
) -> Result<Option<Vec<String>>> {
    conn.exists(path, true)?;
    match conn.get_children(path, true) {
        Ok(children) => Ok(Some(children)),
        Err(Error::NoSuchNode(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

impl ClientInner {
    fn process(
        &self,
        event: WatchedEvent,
    ) {
        if event.is_state_change() {
            self.monitor.increase_state_change_event_counter();
        }
        if event.is_data_change() {
            self.monitor.increase_data_change_event_counter();
        }

        match event {
            WatchedEvent::State(state) => self.process_state_change(state),
            WatchedEvent::Node { path, kind } => self.process_node_event(&path, kind),
        }
    }

    fn process_state_change(
        &self,
        state: SessionState,
    ) {
        info!("session state changed to {:?}", state);
        self.set_state(state);

        for listener in self.listeners.state_listeners() {
            deliver("state", "<session>", || listener.handle_state_changed(state));
        }

        match state {
            SessionState::Connected => self.restore_pending_watches(),
            SessionState::Expired => self.reestablish_session(),
            _ => {}
        }
    }

    /// Parks `path` for re-arming on reconnect if `e` is transient.
    fn defer_watch(
        &self,
        kind: WatchKind,
        path: &str,
        e: &Error,
    ) {
        if e.is_retryable() {
            warn!("{:?} watch on {} not re-installed ({}), retrying once connected", kind, path, e);
            self.pending_watches.lock().paths(kind).insert(path.to_string());
        } else {
            warn!("failed to re-install {:?} watch on {}: {}", kind, path, e);
        }
    }

    fn restore_pending_watches(&self) {
        let pending = std::mem::take(&mut *self.pending_watches.lock());

        for path in pending.data {
            let listeners = self.listeners.data_listeners(&path);
            if listeners.is_empty() {
                continue;
            }
            match self.with_connection(|conn| conn.exists(&path, true)) {
                Ok(stat) => {
                    debug!("restored data watch on {}", path);
                    for listener in listeners {
                        if stat.is_some() {
                            deliver("data", &path, || listener.handle_data_change(&path));
                        } else {
                            deliver("data", &path, || listener.handle_data_deleted(&path));
                        }
                    }
                }
                Err(e) => self.defer_watch(WatchKind::Data, &path, &e),
            }
        }

        for path in pending.child {
            let listeners = self.listeners.child_listeners(&path);
            if listeners.is_empty() {
                continue;
            }
            match self.watch_children(&path) {
                Ok(children) => {
                    debug!("restored child watch on {}", path);
                    for listener in listeners {
                        deliver("child", &path, || {
                            listener.handle_child_change(&path, children.as_deref())
                        });
                    }
                }
                Err(e) => self.defer_watch(WatchKind::Child, &path, &e),
            }
        }
    }

    /// Replaces an expired session, re-installs every watch and announces
    /// the new session. On failure the handle is dropped, so later
    /// operations fail with `InvalidSession` instead of retrying.
    fn reestablish_session(&self) {
        if !self.lifecycle.is_open() {
            return;
        }
        let connection = match self.factory.connect(&self.config, self.events.clone()) {
            Ok(connection) => connection,
            Err(e) => {
                error!("failed to re-establish session: {}", e);
                if let Some(old) = self.session.swap(None) {
                    old.connection.close();
                }
                self.state_changed.notify_all();
                return;
            }
        };
        info!("established new session {:#x}", connection.session_id());
        if let Some(old) = self.session.swap(Some(Arc::new(SessionHandle { connection }))) {
            old.connection.close();
        }
        self.state_changed.notify_all();

        self.reinstall_watches();
        for listener in self.listeners.state_listeners() {
            deliver("state", "<session>", || listener.handle_new_session());
        }
    }

    fn reinstall_watches(&self) {
        *self.pending_watches.lock() = PendingWatches::default();
        for path in self.listeners.watched_data_paths() {
            if let Err(e) = self.with_connection(|conn| conn.exists(&path, true)) {
                self.defer_watch(WatchKind::Data, &path, &e);
            }
        }
        for path in self.listeners.watched_child_paths() {
            if let Err(e) = self.watch_children(&path) {
                self.defer_watch(WatchKind::Child, &path, &e);
            }
        }
    }

    /// Installs an existence watch plus a child watch; `None` if `path` is absent.
    fn watch_children(
        &self,
        path: &str,
    ) -> Result<Option<Vec<String>>> {
        self.with_connection(|conn| children_with_watch(conn, path))
    }

    fn process_node_event(
        &self,
        path: &str,
        kind: EventKind,
    ) {
        if kind != EventKind::NodeChildrenChanged {
            let listeners = self.listeners.data_listeners(path);
            if !listeners.is_empty() {
                if let Err(e) = self.with_connection(|conn| conn.exists(path, true)) {
                    self.defer_watch(WatchKind::Data, path, &e);
                }
                for listener in listeners {
                    if kind == EventKind::NodeDeleted {
                        deliver("data", path, || listener.handle_data_deleted(path));
                    } else {
                        deliver("data", path, || listener.handle_data_change(path));
                    }
                }
            }
        }

        if kind != EventKind::NodeDataChanged {
            let listeners = self.listeners.child_listeners(path);
            if !listeners.is_empty() {
                // the child list is unreadable; delivered once re-armed
                let children = match self.watch_children(path) {
                    Ok(children) => children,
                    Err(e) => {
                        self.defer_watch(WatchKind::Child, path, &e);
                        return;
                    }
                };
                for listener in listeners {
                    deliver("child", path, || listener.handle_child_change(path, children.as_deref()));
                }
            }
        }
    }
}

impl CoordClient {
    /// Subscribes `listener` to data changes of `path`, which may not exist yet.
    pub fn subscribe_data_changes(
        &self,
        path: &str,
        listener: Arc<dyn DataListener>,
    ) -> Result<()> {
        validate_path(path)?;
        self.inner.listeners.add_data(path, listener);
        self.inner.retry_until_connected(|conn| conn.exists(path, true))?;
        Ok(())
    }

    /// Registers `listener` for `path` without store I/O. The watch is
    /// installed by the next read of `path` through this client.
    pub fn register_data_listener(
        &self,
        path: &str,
        listener: Arc<dyn DataListener>,
    ) -> Result<()> {
        validate_path(path)?;
        self.inner.listeners.add_data(path, listener);
        Ok(())
    }

    pub fn unsubscribe_data_changes(
        &self,
        path: &str,
        listener: &Arc<dyn DataListener>,
    ) {
        self.inner.listeners.remove_data(path, listener);
    }

    /// Subscribes `listener` to child list changes of `path` and returns the
    /// current children, `None` if `path` does not exist yet.
    pub fn subscribe_child_changes(
        &self,
        path: &str,
        listener: Arc<dyn ChildListener>,
    ) -> Result<Option<Vec<String>>> {
        validate_path(path)?;
        self.inner.listeners.add_child(path, listener);
        self.inner.retry_until_connected(|conn| children_with_watch(conn, path))
    }

    pub fn unsubscribe_child_changes(
        &self,
        path: &str,
        listener: &Arc<dyn ChildListener>,
    ) {
        self.inner.listeners.remove_child(path, listener);
    }

    pub fn subscribe_state_changes(
        &self,
        listener: Arc<dyn StateListener>,
    ) {
        self.inner.listeners.add_state(listener);
    }

    pub fn unsubscribe_state_changes(
        &self,
        listener: &Arc<dyn StateListener>,
    ) {
        self.inner.listeners.remove_state(listener);
    }
}
