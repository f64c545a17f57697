use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Session and retry settings of a coordination client
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Comma-separated `host:port` list of store servers
    #[serde(default = "default_servers")]
    pub servers: String,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// How long `build()` waits for the first session to connect
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default)]
    pub retry: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            session_timeout_ms: default_session_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            retry: BackoffPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.retry.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.split(',').all(|s| s.trim().is_empty()) {
            return Err(Error::InvalidConfig("client.servers cannot be empty".into()));
        }
        if self.session_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "client.session_timeout_ms must be > 0".into(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "client.connection_timeout_ms must be > 0".into(),
            ));
        }
        self.retry.validate()
    }
}

fn default_servers() -> String {
    "localhost:2181".to_string()
}
fn default_session_timeout_ms() -> u64 {
    30_000
}
fn default_connection_timeout_ms() -> u64 {
    60_000
}
