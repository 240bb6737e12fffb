use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Where and how container logs are requested from the API server.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KubeConfig {
    /// Namespace holding the workspace pods
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Number of existing lines sent before following; `None` sends everything
    #[serde(default = "default_tail_lines")]
    pub tail_lines: Option<i64>,

    /// Prefix every line with its RFC3339 timestamp
    #[serde(default)]
    pub timestamps: bool,

    /// Only return lines newer than this many seconds
    #[serde(default)]
    pub since_seconds: Option<i64>,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            tail_lines: default_tail_lines(),
            timestamps: false,
            since_seconds: None,
        }
    }
}

impl KubeConfig {
    /// # Errors
    /// Returns `Error::InvalidConfig` when:
    /// - `namespace` is not a valid DNS-1123 label
    /// - `tail_lines` or `since_seconds` is not positive
    pub fn validate(&self) -> Result<()> {
        if !is_dns_label(&self.namespace) {
            return Err(Error::InvalidConfig(format!(
                "kube.namespace {:?} is not a valid DNS-1123 label",
                self.namespace
            )));
        }
        if matches!(self.tail_lines, Some(n) if n < 0) {
            return Err(Error::InvalidConfig("kube.tail_lines cannot be negative".into()));
        }
        if matches!(self.since_seconds, Some(n) if n <= 0) {
            return Err(Error::InvalidConfig("kube.since_seconds must be > 0".into()));
        }
        Ok(())
    }
}

fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

fn default_namespace() -> String {
    "default".to_string()
}
fn default_tail_lines() -> Option<i64> {
    Some(100)
}
