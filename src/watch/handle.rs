use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Weak;

use super::entry::Detach;
use super::entry::ListenerId;
use super::registry::ListenerRegistry;
use crate::ContainerKey;

/// Subscription of one listener to one container's logs.
///
/// Dropping the handle unsubscribes the listener. When it was the last one, the
/// watch tears down and closes its log stream.
#[derive(Debug)]
pub struct WatchHandle {
    key: ContainerKey,
    id: ListenerId,
    registry: Weak<ListenerRegistry>,
    released: AtomicBool,
}

impl WatchHandle {
    pub(crate) fn new(
        key: ContainerKey,
        id: ListenerId,
        registry: Weak<ListenerRegistry>,
    ) -> Self {
        Self {
            key,
            id,
            registry,
            released: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &ContainerKey {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this handle has already been released.
    pub fn is_stopped(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Detaches the listener. Returns `false` if it was already detached, either
    /// by an earlier call or because the watch stopped on its own.
    pub(crate) fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        registry.remove_listener(&self.key, self.id) != Detach::NotFound
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.release();
    }
}
