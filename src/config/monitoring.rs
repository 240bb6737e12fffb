use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// The `/metrics` endpoint served by the daemon.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub prometheus_enabled: bool,

    /// Address the metrics listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: false,
            listen_addr: default_listen_addr(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

impl MonitoringConfig {
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.prometheus_port)
    }

    /// Scrapers need a fixed, unprivileged port, so port 0 and ports below 1024
    /// are rejected while the endpoint is enabled.
    pub fn validate(&self) -> Result<()> {
        if !self.prometheus_enabled {
            if self.endpoint() != MonitoringConfig::default().endpoint() {
                warn!(endpoint = %self.endpoint(), "metrics endpoint configured but prometheus_enabled is false");
            }
            return Ok(());
        }

        match self.prometheus_port {
            0 => Err(Error::InvalidConfig(
                "monitoring.prometheus_port must be a fixed port for scrapers".into(),
            )),
            port if port < 1024 => Err(Error::InvalidConfig(format!(
                "monitoring.prometheus_port {port} is privileged; the daemon does not run as root"
            ))),
            _ => Ok(()),
        }
    }
}

fn default_listen_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_prometheus_port() -> u16 {
    9090
}
