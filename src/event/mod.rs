//! Watch lifecycle events.

mod bus;
mod types;

pub use bus::*;
pub use types::*;
