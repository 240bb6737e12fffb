use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Directory receiving the daemon's rolling log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Upper bound for draining watches after a shutdown signal
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("server.log_dir cannot be empty".into()));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(Error::InvalidConfig("server.shutdown_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_shutdown_timeout_ms() -> u64 {
    10_000
}
