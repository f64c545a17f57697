use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::CUSTOMIZED_MONITOR_TYPE;
use crate::SESSION_ID_MONITOR_TYPE;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_monitoring_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub monitor_type: Option<String>,

    /// Unset means the session id becomes the key
    #[serde(default)]
    pub monitor_key: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitoring_enabled(),
            monitor_type: None,
            monitor_key: None,
        }
    }
}

impl MonitoringConfig {
    /// Resolves the `(monitor_type, monitor_key)` label pair for a session.
    pub fn labels(
        &self,
        session_id: u64,
    ) -> (String, String) {
        match (&self.monitor_type, &self.monitor_key) {
            (_, None) => (SESSION_ID_MONITOR_TYPE.to_string(), format!("{session_id:x}")),
            (None, Some(key)) => (CUSTOMIZED_MONITOR_TYPE.to_string(), key.clone()),
            (Some(t), Some(key)) => (t.clone(), key.clone()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(&self.monitor_key, Some(k) if k.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "monitoring.monitor_key cannot be blank".into(),
            ));
        }
        if matches!(&self.monitor_type, Some(t) if t.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "monitoring.monitor_type cannot be blank".into(),
            ));
        }
        Ok(())
    }
}

fn default_monitoring_enabled() -> bool {
    true
}
