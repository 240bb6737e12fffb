//! Container log watching for workspace pods.
//!
//! A [`WatchLog`] attaches to the live log stream of a container, fans each chunk
//! out to every registered [`LogListener`] and announces on the [`EventBus`] when
//! a watch stops, so consumers can detach, reconnect or surface the error.
//!
//! ```ignore
//! let bus = Arc::new(EventBus::new());
//! let source = Arc::new(KubeLogSource::try_default(config.kube.clone()).await?);
//! let watch_log = WatchLog::new(source, bus.clone(), config.watch.clone());
//!
//! let (listener, mut lines) = ChannelListener::new();
//! let handle = watch_log.start(ContainerKey::new("ws-1", "theia-ide"), listener).await?;
//! ```

mod config;
mod errors;
mod event;
mod metrics;
mod source;
pub mod utils;
mod watch;

pub use config::*;
pub use errors::*;
pub use event::*;
pub use metrics::*;
pub use source::*;
pub use utils::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
