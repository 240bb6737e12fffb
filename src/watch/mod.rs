//! Container log watching.
//!
//! [`WatchLog`] owns one watch per container and fans its log chunks out to every
//! registered [`LogListener`]. The registry keeps per-key state only, so traffic on
//! one container never waits on another.

mod entry;
mod handle;
mod listener;
mod registry;
mod types;
mod watch_log;

pub use handle::*;
pub use listener::*;
pub use types::*;
pub use watch_log::*;
