use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Bound on closing a log stream during teardown; the stop event is published
    /// once it elapses even if the stream did not finish closing
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Containers the daemon watches at startup
    #[serde(default)]
    pub targets: Vec<WatchTarget>,
}

/// A pod to watch. Without `container`, every container of the pod is watched.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub pod: String,
    #[serde(default)]
    pub container: Option<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: default_close_timeout_ms(),
            targets: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.close_timeout_ms == 0 {
            return Err(Error::InvalidConfig("watch.close_timeout_ms must be > 0".into()));
        }
        for target in &self.targets {
            if target.pod.is_empty() {
                return Err(Error::InvalidConfig("watch.targets: pod cannot be empty".into()));
            }
            if matches!(&target.container, Some(c) if c.is_empty()) {
                return Err(Error::InvalidConfig(format!(
                    "watch.targets: empty container name for pod {}",
                    target.pod
                )));
            }
        }
        Ok(())
    }
}

fn default_close_timeout_ms() -> u64 {
    5_000
}
