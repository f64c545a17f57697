//! Subscriber traits and the per-client subscription table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Result;
use crate::SessionState;

/// Notified about data changes on one path.
pub trait DataListener: Send + Sync {
    /// The node was created or its data changed
    fn handle_data_change(
        &self,
        path: &str,
    ) -> Result<()>;

    fn handle_data_deleted(
        &self,
        path: &str,
    ) -> Result<()>;
}

/// Notified about child list changes of one path.
pub trait ChildListener: Send + Sync {
    /// `children` is `None` when the parent no longer exists.
    fn handle_child_change(
        &self,
        parent: &str,
        children: Option<&[String]>,
    ) -> Result<()>;
}

/// Notified about session transitions.
pub trait StateListener: Send + Sync {
    fn handle_state_changed(
        &self,
        state: SessionState,
    ) -> Result<()>;

    /// A replacement session is established and all watches are re-installed.
    fn handle_new_session(&self) -> Result<()>;
}

/// Listeners keyed by path. Lookups clone the `Arc`s so callbacks run
/// without holding the lock.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    data: RwLock<HashMap<String, Vec<Arc<dyn DataListener>>>>,
    child: RwLock<HashMap<String, Vec<Arc<dyn ChildListener>>>>,
    state: RwLock<Vec<Arc<dyn StateListener>>>,
}

fn add_unique<T: ?Sized>(
    list: &mut Vec<Arc<T>>,
    listener: Arc<T>,
) {
    if !list.iter().any(|l| Arc::ptr_eq(l, &listener)) {
        list.push(listener);
    }
}

fn remove_from<T: ?Sized>(
    map: &mut HashMap<String, Vec<Arc<T>>>,
    path: &str,
    listener: &Arc<T>,
) {
    if let Some(list) = map.get_mut(path) {
        list.retain(|l| !Arc::ptr_eq(l, listener));
        if list.is_empty() {
            map.remove(path);
        }
    }
}

impl ListenerRegistry {
    pub(crate) fn add_data(
        &self,
        path: &str,
        listener: Arc<dyn DataListener>,
    ) {
        add_unique(self.data.write().entry(path.to_string()).or_default(), listener);
    }

    pub(crate) fn remove_data(
        &self,
        path: &str,
        listener: &Arc<dyn DataListener>,
    ) {
        remove_from(&mut self.data.write(), path, listener);
    }

    pub(crate) fn add_child(
        &self,
        path: &str,
        listener: Arc<dyn ChildListener>,
    ) {
        add_unique(self.child.write().entry(path.to_string()).or_default(), listener);
    }

    pub(crate) fn remove_child(
        &self,
        path: &str,
        listener: &Arc<dyn ChildListener>,
    ) {
        remove_from(&mut self.child.write(), path, listener);
    }

    pub(crate) fn add_state(
        &self,
        listener: Arc<dyn StateListener>,
    ) {
        add_unique(&mut self.state.write(), listener);
    }

    pub(crate) fn remove_state(
        &self,
        listener: &Arc<dyn StateListener>,
    ) {
        self.state.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn data_listeners(
        &self,
        path: &str,
    ) -> Vec<Arc<dyn DataListener>> {
        self.data.read().get(path).cloned().unwrap_or_default()
    }

    pub(crate) fn child_listeners(
        &self,
        path: &str,
    ) -> Vec<Arc<dyn ChildListener>> {
        self.child.read().get(path).cloned().unwrap_or_default()
    }

    pub(crate) fn state_listeners(&self) -> Vec<Arc<dyn StateListener>> {
        self.state.read().clone()
    }

    pub(crate) fn has_data_listeners(
        &self,
        path: &str,
    ) -> bool {
        self.data.read().contains_key(path)
    }

    pub(crate) fn has_child_listeners(
        &self,
        path: &str,
    ) -> bool {
        self.child.read().contains_key(path)
    }

    pub(crate) fn watched_data_paths(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    pub(crate) fn watched_child_paths(&self) -> Vec<String> {
        self.child.read().keys().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        self.data.write().clear();
        self.child.write().clear();
        self.state.write().clear();
    }
}
