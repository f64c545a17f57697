use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Root segment of every cached namespace
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(Error::InvalidConfig("cache.cluster_name cannot be empty".into()));
        }
        if self.cluster_name.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "cache.cluster_name {:?} must be a single path segment",
                self.cluster_name
            )));
        }
        Ok(())
    }
}

fn default_cluster_name() -> String {
    "default-cluster".to_string()
}
