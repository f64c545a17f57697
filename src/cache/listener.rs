use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;

use super::ChangeCategory;
use super::ClusterStateCache;
use crate::path::join;
use crate::ChildListener;
use crate::CoordClient;
use crate::DataListener;
use crate::Result;
use crate::SessionState;
use crate::StateListener;
use crate::WeakClient;

/// Marks cache categories dirty as watch events arrive.
///
/// Child changes of a namespace and data changes of its entries dirty that
/// namespace's category; session expiry and a new session dirty all of
/// them. Callbacks only flip flags, so they never block the event thread.
pub struct CacheChangeListener {
    cache: Arc<ClusterStateCache>,
    client: WeakClient,
    entries: Mutex<HashSet<String>>,
    this: Weak<CacheChangeListener>,
}

impl CacheChangeListener {
    /// Subscribes a new listener for every namespace of `cache` on `client`.
    pub fn attach(
        client: &CoordClient,
        cache: Arc<ClusterStateCache>,
    ) -> Result<Arc<Self>> {
        let listener = Arc::new_cyclic(|this| Self {
            cache,
            client: client.downgrade(),
            entries: Mutex::new(HashSet::new()),
            this: this.clone(),
        });

        client.subscribe_state_changes(listener.clone());
        for category in ChangeCategory::ALL {
            let namespace = listener.cache.paths().namespace(category);
            let children = client.subscribe_child_changes(&namespace, listener.clone())?;
            listener.track_entries(client, &namespace, children.as_deref().unwrap_or_default())?;
        }
        info!("cache listener attached to {}", listener.cache.paths().root());
        Ok(listener)
    }

    /// Removes every subscription made by this listener.
    pub fn detach(
        &self,
        client: &CoordClient,
    ) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let as_state: Arc<dyn StateListener> = this.clone();
        let as_child: Arc<dyn ChildListener> = this.clone();
        let as_data: Arc<dyn DataListener> = this;

        client.unsubscribe_state_changes(&as_state);
        for category in ChangeCategory::ALL {
            client.unsubscribe_child_changes(&self.cache.paths().namespace(category), &as_child);
        }
        for entry in self.entries.lock().drain() {
            client.unsubscribe_data_changes(&entry, &as_data);
        }
    }

    pub fn cache(&self) -> &Arc<ClusterStateCache> {
        &self.cache
    }

    fn track_entries(
        &self,
        client: &CoordClient,
        namespace: &str,
        children: &[String],
    ) -> Result<()> {
        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };
        let mut entries = self.entries.lock();
        for child in children {
            let path = join(namespace, child);
            if entries.insert(path.clone()) {
                client.register_data_listener(&path, this.clone())?;
            }
        }
        Ok(())
    }

    fn mark(
        &self,
        path: &str,
    ) {
        if let Some(category) = self.cache.paths().category_of(path) {
            debug!("{} changed, marking {} dirty", path, category);
            self.cache.notify_data_change(category);
        }
    }
}

impl ChildListener for CacheChangeListener {
    fn handle_child_change(
        &self,
        parent_path: &str,
        children: Option<&[String]>,
    ) -> Result<()> {
        self.mark(parent_path);
        if let (Some(children), Some(client)) = (children, self.client.upgrade()) {
            self.track_entries(&client, parent_path, children)?;
        }
        Ok(())
    }
}

impl DataListener for CacheChangeListener {
    fn handle_data_change(
        &self,
        path: &str,
    ) -> Result<()> {
        self.mark(path);
        Ok(())
    }

    fn handle_data_deleted(
        &self,
        path: &str,
    ) -> Result<()> {
        self.mark(path);
        if self.entries.lock().remove(path) {
            if let (Some(client), Some(this)) = (self.client.upgrade(), self.this.upgrade()) {
                let as_data: Arc<dyn DataListener> = this;
                client.unsubscribe_data_changes(path, &as_data);
            }
        }
        Ok(())
    }
}

impl StateListener for CacheChangeListener {
    fn handle_state_changed(
        &self,
        state: SessionState,
    ) -> Result<()> {
        if state == SessionState::Expired {
            info!("session expired, cache needs a full refresh");
            self.cache.require_full_refresh();
        }
        Ok(())
    }

    fn handle_new_session(&self) -> Result<()> {
        self.cache.require_full_refresh();
        Ok(())
    }
}
