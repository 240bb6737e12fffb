use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single attempt timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig(format!("retry.{name}.max_retries must be > 0")));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig(format!("retry.{name}.timeout_ms must be > 0")));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry.{name}.base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Divide strategies by operation
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    /// Opening a container's log stream (`start_with_retry`)
    #[serde(default = "default_open_policy")]
    pub open: BackoffPolicy,

    /// Reopening a watch that stopped with an error
    #[serde(default = "default_reconnect_policy")]
    pub reconnect: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            open: default_open_policy(),
            reconnect: default_reconnect_policy(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.open.validate("open")?;
        self.reconnect.validate("reconnect")?;
        Ok(())
    }
}

fn default_open_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 10,
        timeout_ms: 5000,
        base_delay_ms: 500,
        max_delay_ms: 10000,
    }
}
fn default_reconnect_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 30,
        timeout_ms: 5000,
        base_delay_ms: 1000,
        max_delay_ms: 30000,
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    1000
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5000
}
