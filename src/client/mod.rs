//! Coordination client: path-addressed CRUD and watches over a store session.
//!
//! [`CoordClient`] wraps a raw [`crate::Connection`] with
//! - a retry loop that rides out transient connection loss,
//! - the node size limit, checked before any I/O,
//! - per-path serialization of [`crate::Record`]s,
//! - per-operation metrics reported to a [`crate::MetricsSink`].
//!
//! Watch and session events are delivered on one dedicated event thread;
//! asynchronous operations complete on a separate completion thread.
//!
//! # Basic Usage
//! ```ignore
//! use std::sync::Arc;
//! use coordcache::{CoordClient, CreateMode, MemoryStore, Record, ANY_VERSION};
//!
//! let client = CoordClient::builder(Arc::new(MemoryStore::new())).build()?;
//! client.create_persistent("/cluster/LIVEINSTANCES", true)?;
//! client.create(
//!     "/cluster/LIVEINSTANCES/node_1",
//!     Some(&Record::new("node_1")),
//!     CreateMode::Ephemeral,
//! )?;
//! let (record, stat) = client.read_data("/cluster/LIVEINSTANCES/node_1")?;
//! client.write_data("/cluster/LIVEINSTANCES/node_1", &record, stat.version)?;
//! client.close();
//! ```

mod async_ops;
mod builder;
mod dispatcher;
mod lifecycle;
mod listener;
mod ops;
mod retry;

pub use async_ops::*;
pub use builder::*;
pub use lifecycle::LifecycleState;
pub use listener::*;

#[cfg(test)]
mod client_test;

use std::sync::Arc;
use std::sync::Weak;
use std::thread;
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use parking_lot::Condvar;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use self::async_ops::JobSender;
use self::dispatcher::PendingWatches;
use self::lifecycle::Lifecycle;
use self::listener::ListenerRegistry;
use crate::ClientConfig;
use crate::Connection;
use crate::ConnectionFactory;
use crate::EventSink;
use crate::MetricsSink;
use crate::PathBasedSerializer;
use crate::SessionState;

pub(crate) struct SessionHandle {
    pub(crate) connection: Arc<dyn Connection>,
}

pub(crate) struct ClientInner {
    pub(crate) factory: Arc<dyn ConnectionFactory>,
    /// `None` once the session cannot be re-established or the client closed
    pub(crate) session: ArcSwapOption<SessionHandle>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) state_changed: Condvar,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) config: ClientConfig,
    pub(crate) serializer: Arc<dyn PathBasedSerializer>,
    pub(crate) monitor: Arc<dyn MetricsSink>,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) pending_watches: Mutex<PendingWatches>,
    pub(crate) events: EventSink,
    pub(crate) jobs: Mutex<Option<JobSender>>,
    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientInner {
    pub(crate) fn set_state(
        &self,
        state: SessionState,
    ) {
        let mut current = self.state.lock();
        if *current != SessionState::Closed {
            *current = state;
        }
        self.state_changed.notify_all();
    }

    /// Tears the client down once. Safe to call from the event and
    /// completion threads: joining the calling thread is skipped.
    pub(crate) fn shutdown(&self) {
        if !self.lifecycle.begin_close() {
            trace!("client already closing");
            return;
        }
        debug!("closing coordination client");

        self.listeners.clear();
        if let Some(handle) = self.session.swap(None) {
            handle.connection.close();
        }
        {
            let mut state = self.state.lock();
            *state = SessionState::Closed;
            self.state_changed.notify_all();
        }

        self.jobs.lock().take();
        self.events.shutdown();

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.thread().id() == current {
                trace!(
                    "close called on {:?}, not joining it",
                    worker.thread().name()
                );
                continue;
            }
            if worker.join().is_err() {
                warn!("client worker thread panicked");
            }
        }

        self.monitor.unregister();
        self.lifecycle.finish_close();
        info!("coordination client closed");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a coordination client. Clones share one session; dropping the
/// last clone closes it.
#[derive(Clone)]
pub struct CoordClient {
    pub(crate) inner: Arc<ClientInner>,
}

/// Non-owning handle, for listeners that must not keep the client alive.
#[derive(Clone)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    pub fn upgrade(&self) -> Option<CoordClient> {
        self.inner.upgrade().map(|inner| CoordClient { inner })
    }
}

impl CoordClient {
    pub fn builder(factory: Arc<dyn ConnectionFactory>) -> CoordClientBuilder {
        CoordClientBuilder::new(factory)
    }

    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Id of the current session, `None` once closed.
    pub fn session_id(&self) -> Option<u64> {
        self.inner.session.load().as_ref().map(|h| h.connection.session_id())
    }

    /// Last session state seen on the event thread
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn servers(&self) -> Option<String> {
        self.inner.session.load().as_ref().map(|h| h.connection.servers())
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.lifecycle.is_open()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Closes the session, stops the worker threads and unregisters metrics.
    ///
    /// Idempotent. May be called from a listener running on the event thread.
    pub fn close(&self) {
        self.inner.shutdown();
    }
}
