//! Lazily refreshed snapshot of cluster state.
//!
//! Every [`ChangeCategory`] carries a dirty flag and an exposed map.
//! [`ClusterStateCache::refresh`] re-fetches only dirty categories and
//! publishes each result with one atomic pointer swap, so readers never
//! lock and never observe a half-built map.

mod category;
mod listener;

pub use category::*;
pub use listener::*;


use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::CacheConfig;
use crate::CoordClient;
use crate::ExternalView;
use crate::IdealState;
use crate::InstanceConfig;
use crate::LiveInstance;
use crate::Property;
use crate::Record;
use crate::Result;

/// Bulk child fetch used by refresh.
#[cfg_attr(test, automock)]
pub trait PropertyReader: Send + Sync {
    /// Decoded children of `path` keyed by child name; empty if `path` is absent.
    fn get_children_records(
        &self,
        path: &str,
    ) -> Result<HashMap<String, Record>>;
}

impl PropertyReader for CoordClient {
    fn get_children_records(
        &self,
        path: &str,
    ) -> Result<HashMap<String, Record>> {
        CoordClient::get_children_records(self, path)
    }
}

/// Read-only snapshot of one category
pub type Snapshot<P> = Arc<HashMap<String, P>>;

struct CategoryMap<P>(ArcSwap<HashMap<String, P>>);

impl<P: Property> CategoryMap<P> {
    fn new() -> Self {
        Self(ArcSwap::from_pointee(HashMap::new()))
    }

    fn load(&self) -> Snapshot<P> {
        self.0.load_full()
    }

    fn replace(
        &self,
        records: HashMap<String, Record>,
    ) -> usize {
        let map: HashMap<String, P> = records.into_iter().map(|(k, r)| (k, P::from(r))).collect();
        let len = map.len();
        self.0.store(Arc::new(map));
        len
    }

    fn clear(&self) {
        self.0.store(Arc::new(HashMap::new()));
    }
}

pub struct ClusterStateCache {
    paths: ClusterPaths,
    dirty: DashMap<ChangeCategory, bool>,
    external_views: CategoryMap<ExternalView>,
    live_instances: CategoryMap<LiveInstance>,
    instance_configs: CategoryMap<InstanceConfig>,
    ideal_states: CategoryMap<IdealState>,
    refresh_lock: Mutex<()>,
}

impl ClusterStateCache {
    /// Every category starts dirty, so the first refresh loads everything.
    pub fn new(cluster_name: &str) -> Self {
        let dirty = DashMap::new();
        for category in ChangeCategory::ALL {
            dirty.insert(category, true);
        }
        Self {
            paths: ClusterPaths::new(cluster_name),
            dirty,
            external_views: CategoryMap::new(),
            live_instances: CategoryMap::new(),
            instance_configs: CategoryMap::new(),
            ideal_states: CategoryMap::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Validates `config` and builds a cache for its cluster.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(&config.cluster_name))
    }

    pub fn paths(&self) -> &ClusterPaths {
        &self.paths
    }

    /// Re-fetches every dirty category, in [`ChangeCategory::ALL`] order.
    ///
    /// A category's flag is cleared before its fetch, so a change notified
    /// while the fetch is in flight is picked up by the next refresh. A
    /// failed fetch re-marks the category dirty, leaves its map untouched
    /// and ends the refresh with that error; categories refreshed earlier
    /// in the same call keep their new maps.
    pub fn refresh<R: PropertyReader + ?Sized>(
        &self,
        reader: &R,
    ) -> Result<()> {
        let _guard = self.refresh_lock.lock();
        let started = Instant::now();
        info!("START: refreshing cluster state of {}", self.paths.cluster_name());

        for category in ChangeCategory::ALL {
            if !self.take_dirty(category) {
                trace!("{} is fresh, skipping", category);
                continue;
            }

            let namespace = self.paths.namespace(category);
            let records = match reader.get_children_records(&namespace) {
                Ok(records) => records,
                Err(e) => {
                    self.notify_data_change(category);
                    warn!("refresh of {} from {} failed: {}", category, namespace, e);
                    return Err(e);
                }
            };

            let len = match category {
                ChangeCategory::ExternalView => self.external_views.replace(records),
                ChangeCategory::LiveInstance => self.live_instances.replace(records),
                ChangeCategory::InstanceConfig => self.instance_configs.replace(records),
                ChangeCategory::IdealState => self.ideal_states.replace(records),
            };
            debug!("refreshed {} with {} entries", category, len);
        }
        info!(
            "END: refreshed cluster state of {}, took {} ms",
            self.paths.cluster_name(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Atomically clears the flag, returning whether it was set.
    fn take_dirty(
        &self,
        category: ChangeCategory,
    ) -> bool {
        self.dirty.insert(category, false).unwrap_or(true)
    }

    /// Marks `category` stale. Never lost, even while a refresh runs.
    pub fn notify_data_change(
        &self,
        category: ChangeCategory,
    ) {
        self.dirty.insert(category, true);
    }

    /// Marks every category stale, e.g. after a new session.
    pub fn require_full_refresh(&self) {
        for category in ChangeCategory::ALL {
            self.notify_data_change(category);
        }
    }

    /// Empties the exposed map of `category`; its dirty flag is untouched.
    pub fn clear_cache(
        &self,
        category: ChangeCategory,
    ) {
        match category {
            ChangeCategory::ExternalView => self.external_views.clear(),
            ChangeCategory::LiveInstance => self.live_instances.clear(),
            ChangeCategory::InstanceConfig => self.instance_configs.clear(),
            ChangeCategory::IdealState => self.ideal_states.clear(),
        }
    }

    pub fn is_dirty(
        &self,
        category: ChangeCategory,
    ) -> bool {
        self.dirty.get(&category).map(|flag| *flag).unwrap_or(true)
    }

    pub fn external_views(&self) -> Snapshot<ExternalView> {
        self.external_views.load()
    }

    pub fn live_instances(&self) -> Snapshot<LiveInstance> {
        self.live_instances.load()
    }

    pub fn instance_configs(&self) -> Snapshot<InstanceConfig> {
        self.instance_configs.load()
    }

    pub fn ideal_states(&self) -> Snapshot<IdealState> {
        self.ideal_states.load()
    }
}

fn write_map<P: Property>(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    map: &HashMap<String, P>,
) -> fmt::Result {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    writeln!(f, "{label}:")?;
    for key in keys {
        writeln!(f, "  {}", map[key].record())?;
    }
    Ok(())
}

impl fmt::Display for ClusterStateCache {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f, "cluster: {}", self.paths.cluster_name())?;
        write_map(f, "externalViews", &self.external_views())?;
        write_map(f, "liveInstances", &self.live_instances())?;
        write_map(f, "instanceConfigs", &self.instance_configs())?;
        write_map(f, "idealStates", &self.ideal_states())
    }
}
