//! Configuration of the coordination client and the cluster state cache.
//!
//! Sources are merged in this order, later ones winning:
//! 1. Default values from code
//! 2. File named by `CONFIG_PATH`
//! 3. Environment variables prefixed `COORD__`

mod cache;
mod client;
mod monitoring;
mod retry;
pub use cache::*;
pub use client::*;
pub use monitoring::*;
pub use retry::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "COORD";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Settings {
    /// Loads configuration from defaults, `CONFIG_PATH` and `COORD__*`
    /// variables. Does not validate; call [`Settings::validate`] once all
    /// overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("COORD__CLIENT__SERVERS", "zk1:2181,zk2:2181");
    /// let settings = Settings::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Layers one more file over the current values; environment variables
    /// still take precedence.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn validate(self) -> Result<Self> {
        self.client.validate()?;
        self.monitoring.validate()?;
        self.cache.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
