//! Shared helpers for unit tests: logger setup, a scripted in-memory log source
//! and recording listeners.
mod common;
mod scripted_source;

pub use common::*;
pub use scripted_source::*;
