use std::fmt;

use crate::path::join;
use crate::path::parent;
use crate::CONFIGS;
use crate::EXTERNALVIEW;
use crate::IDEALSTATES;
use crate::LIVEINSTANCES;
use crate::PARTICIPANT;

/// Class of cached cluster state, one namespace subtree each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeCategory {
    ExternalView,
    LiveInstance,
    InstanceConfig,
    IdealState,
}

impl ChangeCategory {
    /// Every category, in refresh order
    pub const ALL: [ChangeCategory; 4] = [
        ChangeCategory::ExternalView,
        ChangeCategory::LiveInstance,
        ChangeCategory::InstanceConfig,
        ChangeCategory::IdealState,
    ];
}

impl fmt::Display for ChangeCategory {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            ChangeCategory::ExternalView => "ExternalView",
            ChangeCategory::LiveInstance => "LiveInstance",
            ChangeCategory::InstanceConfig => "InstanceConfig",
            ChangeCategory::IdealState => "IdealState",
        };
        f.write_str(name)
    }
}

/// Namespace layout of one cluster.
///
/// ```text
/// /<cluster>/EXTERNALVIEW/<resource>
/// /<cluster>/LIVEINSTANCES/<instance>
/// /<cluster>/CONFIGS/PARTICIPANT/<instance>
/// /<cluster>/IDEALSTATES/<resource>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPaths {
    root: String,
}

impl ClusterPaths {
    pub fn new(cluster_name: &str) -> Self {
        Self {
            root: join("/", cluster_name),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.root[1..]
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn namespace(
        &self,
        category: ChangeCategory,
    ) -> String {
        match category {
            ChangeCategory::ExternalView => join(&self.root, EXTERNALVIEW),
            ChangeCategory::LiveInstance => join(&self.root, LIVEINSTANCES),
            ChangeCategory::InstanceConfig => join(&join(&self.root, CONFIGS), PARTICIPANT),
            ChangeCategory::IdealState => join(&self.root, IDEALSTATES),
        }
    }

    /// Path of one entry of `category`
    pub fn entry(
        &self,
        category: ChangeCategory,
        name: &str,
    ) -> String {
        join(&self.namespace(category), name)
    }

    /// Category whose namespace is `path` or directly contains it.
    pub fn category_of(
        &self,
        path: &str,
    ) -> Option<ChangeCategory> {
        ChangeCategory::ALL.into_iter().find(|&category| {
            let namespace = self.namespace(category);
            path == namespace || parent(path) == Some(namespace.as_str())
        })
    }
}
