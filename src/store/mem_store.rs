use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::Connection;
use super::ConnectionFactory;
use super::CreateMode;
use super::Stat;
use crate::path::name;
use crate::path::parent;
use crate::path::validate_path;
use crate::path::ROOT;
use crate::time::get_now_as_millis;
use crate::ClientConfig;
use crate::Error;
use crate::EventKind;
use crate::EventSink;
use crate::Result;
use crate::SessionState;
use crate::WatchedEvent;
use crate::ANY_VERSION;

/// In-memory hierarchical store with sessions, ephemeral and sequential
/// nodes and one-shot watches.
///
/// A session left disconnected for longer than its session timeout is
/// expired instead of reconnected. Closed and expired sessions are forgotten.
///
/// Cloning yields another handle to the same store, so several clients can
/// share one namespace. Session faults can be injected with
/// [`disconnect`](Self::disconnect), [`reconnect`](Self::reconnect) and
/// [`expire_session`](Self::expire_session).
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<StoreState>,
    requests: AtomicU64,
}

struct StoreState {
    nodes: BTreeMap<String, MemNode>,
    sessions: HashMap<u64, SessionEntry>,
    next_session_id: u64,
}

struct MemNode {
    data: Vec<u8>,
    stat: Stat,
    children: BTreeSet<String>,
}

struct SessionEntry {
    sink: EventSink,
    state: SessionState,
    session_timeout: Duration,
    disconnected_at: Option<Instant>,
    data_watches: HashSet<String>,
    child_watches: HashSet<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), MemNode::new(Vec::new(), 0));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState {
                    nodes,
                    sessions: HashMap::new(),
                    next_session_id: 1,
                }),
                requests: AtomicU64::new(0),
            }),
        }
    }

    /// Number of operations that reached the store, successful or not
    pub fn request_count(&self) -> u64 {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// `None` once the session is closed or expired.
    pub fn session_state(
        &self,
        session_id: u64,
    ) -> Option<SessionState> {
        self.shared.state.lock().sessions.get(&session_id).map(|s| s.state)
    }

    pub fn session_timeout(
        &self,
        session_id: u64,
    ) -> Option<Duration> {
        self.shared.state.lock().sessions.get(&session_id).map(|s| s.session_timeout)
    }

    /// Number of sessions neither closed nor expired
    pub fn live_sessions(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    /// Opens a new session for `config.servers` publishing to `events`.
    pub fn open_session(
        &self,
        config: &ClientConfig,
        events: EventSink,
    ) -> MemoryConnection {
        let mut state = self.shared.state.lock();
        let session_id = state.next_session_id;
        state.next_session_id += 1;
        events.send(WatchedEvent::State(SessionState::Connected));
        state.sessions.insert(
            session_id,
            SessionEntry {
                sink: events,
                state: SessionState::Connected,
                session_timeout: config.session_timeout(),
                disconnected_at: None,
                data_watches: HashSet::new(),
                child_watches: HashSet::new(),
            },
        );
        info!("opened session {:#x} for {}", session_id, config.servers);

        MemoryConnection {
            shared: self.shared.clone(),
            session_id,
            servers: config.servers.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Drops the session's connection. Watches and ephemerals survive until
    /// [`reconnect`](Self::reconnect) or [`expire_session`](Self::expire_session).
    pub fn disconnect(
        &self,
        session_id: u64,
    ) {
        self.transition(session_id, SessionState::Connected, SessionState::Disconnected);
    }

    /// Restores the connection, or expires the session if it stayed
    /// disconnected longer than its session timeout.
    pub fn reconnect(
        &self,
        session_id: u64,
    ) {
        let timed_out = self
            .shared
            .state
            .lock()
            .sessions
            .get(&session_id)
            .and_then(|entry| entry.disconnected_at.map(|at| at.elapsed() > entry.session_timeout))
            .unwrap_or(false);
        if timed_out {
            debug!("session {:#x} outlived its timeout while disconnected", session_id);
            self.expire_session(session_id);
            return;
        }
        self.transition(session_id, SessionState::Disconnected, SessionState::Connected);
    }

    /// Expires the session: it receives a single `Expired` state event, its
    /// ephemeral nodes are deleted and the store forgets it.
    pub fn expire_session(
        &self,
        session_id: u64,
    ) {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.sessions.remove(&session_id) else {
            return;
        };
        entry.sink.send(WatchedEvent::State(SessionState::Expired));

        state.remove_ephemerals(session_id);
        info!("expired session {:#x}", session_id);
    }

    fn transition(
        &self,
        session_id: u64,
        from: SessionState,
        to: SessionState,
    ) {
        let mut state = self.shared.state.lock();
        if let Some(entry) = state.sessions.get_mut(&session_id) {
            if entry.state == from {
                entry.state = to;
                entry.disconnected_at = (to == SessionState::Disconnected).then(Instant::now);
                entry.sink.send(WatchedEvent::State(to));
                debug!("session {:#x}: {:?} -> {:?}", session_id, from, to);
            }
        }
    }
}

impl ConnectionFactory for MemoryStore {
    fn connect(
        &self,
        config: &ClientConfig,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(self.open_session(config, events)))
    }
}

impl MemNode {
    fn new(
        data: Vec<u8>,
        ephemeral_owner: u64,
    ) -> Self {
        let now = get_now_as_millis();
        Self {
            stat: Stat {
                version: 0,
                cversion: 0,
                ctime: now,
                mtime: now,
                ephemeral_owner,
                data_length: data.len(),
                num_children: 0,
            },
            data,
            children: BTreeSet::new(),
        }
    }
}

fn check_version(
    path: &str,
    expected: i32,
    actual: i32,
) -> Result<()> {
    if expected != ANY_VERSION && expected != actual {
        return Err(Error::VersionConflict {
            path: path.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl StoreState {
    fn check_session(
        &self,
        session_id: u64,
    ) -> Result<()> {
        match self.sessions.get(&session_id).map(|s| s.state) {
            Some(SessionState::Connected) => Ok(()),
            Some(SessionState::Disconnected) | Some(SessionState::Connecting) => Err(
                Error::TransientConnectionLoss(format!("session {session_id:#x} is disconnected")),
            ),
            Some(SessionState::Closed) => Err(Error::InvalidSession(format!(
                "session {session_id:#x} is closed"
            ))),
            Some(SessionState::Expired) | None => Err(Error::SessionExpired(session_id)),
        }
    }

    /// Fires and clears the one-shot watches `kind` triggers on `path`.
    fn trigger(
        &mut self,
        path: &str,
        kind: EventKind,
    ) {
        for entry in self.sessions.values_mut() {
            let fired = match kind {
                EventKind::NodeCreated | EventKind::NodeDataChanged => {
                    entry.data_watches.remove(path)
                }
                EventKind::NodeChildrenChanged => entry.child_watches.remove(path),
                EventKind::NodeDeleted => {
                    let data = entry.data_watches.remove(path);
                    let child = entry.child_watches.remove(path);
                    data || child
                }
            };
            if fired {
                entry.sink.send(WatchedEvent::node(path, kind));
            }
        }
    }

    fn create(
        &mut self,
        session_id: u64,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String> {
        let parent_path = parent(path).ok_or_else(|| Error::NodeExists(path.to_string()))?;
        let parent_node = self
            .nodes
            .get(parent_path)
            .ok_or_else(|| Error::NoSuchNode(parent_path.to_string()))?;
        if parent_node.stat.is_ephemeral() {
            return Err(Error::InvalidArgument(format!(
                "ephemeral node {parent_path} cannot have children"
            )));
        }

        let actual = if mode.is_sequential() {
            format!("{path}{:010}", parent_node.stat.cversion)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&actual) {
            return Err(Error::NodeExists(actual));
        }

        let owner = if mode.is_ephemeral() { session_id } else { 0 };
        self.nodes.insert(actual.clone(), MemNode::new(data.to_vec(), owner));
        if let Some(parent_node) = self.nodes.get_mut(parent_path) {
            parent_node.children.insert(name(&actual).to_string());
            parent_node.stat.cversion += 1;
            parent_node.stat.num_children = parent_node.children.len();
        }

        self.trigger(&actual, EventKind::NodeCreated);
        self.trigger(parent_path, EventKind::NodeChildrenChanged);
        Ok(actual)
    }

    fn delete(
        &mut self,
        path: &str,
        version: i32,
    ) -> Result<()> {
        let parent_path = parent(path)
            .ok_or_else(|| Error::InvalidArgument("the root node cannot be deleted".into()))?;
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| Error::NoSuchNode(path.to_string()))?;
        check_version(path, version, node.stat.version)?;
        if !node.children.is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        if let Some(parent_node) = self.nodes.get_mut(parent_path) {
            parent_node.children.remove(name(path));
            parent_node.stat.cversion += 1;
            parent_node.stat.num_children = parent_node.children.len();
        }

        self.trigger(path, EventKind::NodeDeleted);
        self.trigger(parent_path, EventKind::NodeChildrenChanged);
        Ok(())
    }

    fn remove_ephemerals(
        &mut self,
        session_id: u64,
    ) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == session_id)
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            trace!("removing ephemeral {} of session {:#x}", path, session_id);
            let _ = self.delete(&path, ANY_VERSION);
        }
    }

    fn watch_data(
        &mut self,
        session_id: u64,
        path: &str,
    ) {
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.data_watches.insert(path.to_string());
        }
    }

    fn watch_children(
        &mut self,
        session_id: u64,
        path: &str,
    ) {
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.child_watches.insert(path.to_string());
        }
    }
}

/// A session on a [`MemoryStore`]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    session_id: u64,
    servers: String,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn with_state<T>(
        &self,
        path: &str,
        op: impl FnOnce(&mut StoreState) -> Result<T>,
    ) -> Result<T> {
        self.shared.requests.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidSession(format!(
                "session {:#x} is closed",
                self.session_id
            )));
        }
        validate_path(path)?;
        let mut state = self.shared.state.lock();
        state.check_session(self.session_id)?;
        op(&mut state)
    }
}

impl Connection for MemoryConnection {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn state(&self) -> SessionState {
        if self.closed.load(Ordering::SeqCst) {
            return SessionState::Closed;
        }
        self.shared
            .state
            .lock()
            .sessions
            .get(&self.session_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Expired)
    }

    fn servers(&self) -> String {
        self.servers.clone()
    }

    fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String> {
        let session_id = self.session_id;
        self.with_state(path, |state| state.create(session_id, path, data, mode))
    }

    fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> Result<()> {
        self.with_state(path, |state| state.delete(path, version))
    }

    fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Option<Stat>> {
        let session_id = self.session_id;
        self.with_state(path, |state| {
            if watch {
                state.watch_data(session_id, path);
            }
            Ok(state.nodes.get(path).map(|node| node.stat))
        })
    }

    fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<(Vec<u8>, Stat)> {
        let session_id = self.session_id;
        self.with_state(path, |state| {
            let (data, stat) = state
                .nodes
                .get(path)
                .map(|node| (node.data.clone(), node.stat))
                .ok_or_else(|| Error::NoSuchNode(path.to_string()))?;
            if watch {
                state.watch_data(session_id, path);
            }
            Ok((data, stat))
        })
    }

    fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: i32,
    ) -> Result<Stat> {
        self.with_state(path, |state| {
            let node = state
                .nodes
                .get_mut(path)
                .ok_or_else(|| Error::NoSuchNode(path.to_string()))?;
            check_version(path, version, node.stat.version)?;
            node.data = data.to_vec();
            node.stat.version += 1;
            node.stat.mtime = get_now_as_millis();
            node.stat.data_length = node.data.len();
            let stat = node.stat;

            state.trigger(path, EventKind::NodeDataChanged);
            Ok(stat)
        })
    }

    fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Vec<String>> {
        let session_id = self.session_id;
        self.with_state(path, |state| {
            let children: Vec<String> = state
                .nodes
                .get(path)
                .map(|node| node.children.iter().cloned().collect())
                .ok_or_else(|| Error::NoSuchNode(path.to_string()))?;
            if watch {
                state.watch_children(session_id, path);
            }
            Ok(children)
        })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.shared.state.lock();
        if state.sessions.remove(&self.session_id).is_none() {
            return;
        }
        state.remove_ephemerals(self.session_id);
        info!("closed session {:#x}", self.session_id);
    }
}
