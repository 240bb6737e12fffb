//! Configuration management for the watchlog daemon.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod kubernetes;
mod monitoring;
mod retry;
mod server;
mod watch;
pub use kubernetes::*;
pub use monitoring::*;
pub use retry::*;
pub use server::*;
pub use watch::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "WATCHLOG";

/// Root configuration of the daemon.
///
/// Sources are merged in this order, later ones winning:
/// 1. Values from the `Default` implementations
/// 2. The TOML file named by `CONFIG_PATH`, if set
/// 3. `WATCHLOG__SECTION__KEY` environment variables
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct WatchLogConfig {
    /// Process level settings (log directory, shutdown)
    #[serde(default)]
    pub server: ServerConfig,
    /// Kubernetes namespace and log request parameters
    #[serde(default)]
    pub kube: KubeConfig,
    /// Watch teardown and the containers watched at startup
    #[serde(default)]
    pub watch: WatchConfig,
    /// Metrics export
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Retry policies
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl WatchLogConfig {
    /// Loads configuration from defaults, `CONFIG_PATH` and the environment.
    ///
    /// Does not validate; call [`WatchLogConfig::validate`] once every override has
    /// been applied.
    ///
    /// # Example
    /// ```ignore
    /// std::env::set_var("WATCHLOG__KUBE__NAMESPACE", "workspaces");
    /// let cfg = WatchLogConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies the file at `path` on top of `self`; environment variables still
    /// have the last word.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated configuration.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.kube.validate()?;
        self.watch.validate()?;
        self.monitoring.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
