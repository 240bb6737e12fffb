use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use tracing::trace;

use super::entry::Attach;
use super::entry::Detach;
use super::entry::ListenerId;
use super::entry::WatchEntry;
use crate::ContainerKey;
use crate::LogListener;
use crate::WatchError;

pub(crate) enum AddOutcome {
    Attached,
    /// A watch exists but is tearing down
    Terminating(Arc<WatchEntry>),
    Absent,
}

/// Registry of live watches, keyed by container.
///
/// At most one entry exists per key. Opening a new watch is serialized per key
/// through [`ListenerRegistry::lock_key`]; other keys proceed independently.
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    watches: DashMap<ContainerKey, Arc<WatchEntry>>,
    open_locks: DashMap<ContainerKey, Arc<Mutex<()>>>,
}

/// Per-key open lock; released on drop.
pub(crate) struct KeyLock<'a> {
    registry: &'a ListenerRegistry,
    key: ContainerKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Last holder removes the slot so the lock map does not grow with every key ever watched
        self.registry
            .open_locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock_key(
        &self,
        key: &ContainerKey,
    ) -> KeyLock<'_> {
        let lock = self
            .open_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        KeyLock {
            registry: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    pub(crate) fn get_watch(
        &self,
        key: &ContainerKey,
    ) -> Option<Arc<WatchEntry>> {
        self.watches.get(key).map(|e| e.value().clone())
    }

    pub(crate) fn add_listener(
        &self,
        key: &ContainerKey,
        id: ListenerId,
        listener: Arc<dyn LogListener>,
    ) -> AddOutcome {
        // Clone the entry out so the shard lock is not held while the entry lock is taken
        let Some(entry) = self.get_watch(key) else {
            return AddOutcome::Absent;
        };
        match entry.attach(id, listener) {
            Attach::Attached => {
                trace!(%key, id, "listener attached to existing watch");
                AddOutcome::Attached
            }
            Attach::Terminating => AddOutcome::Terminating(entry),
        }
    }

    pub(crate) fn remove_listener(
        &self,
        key: &ContainerKey,
        id: ListenerId,
    ) -> Detach {
        let Some(entry) = self.get_watch(key) else {
            return Detach::NotFound;
        };
        let outcome = entry.detach(id);
        if outcome == Detach::Drained {
            debug!(%key, "last listener removed, waking delivery loop");
        }
        outcome
    }

    pub(crate) fn insert(
        &self,
        entry: Arc<WatchEntry>,
    ) -> Result<(), WatchError> {
        match self.watches.entry(entry.key().clone()) {
            Entry::Occupied(o) => Err(WatchError::RegistryInconsistency {
                key: o.key().clone(),
                detail: "a watch already exists for this container".to_string(),
            }),
            Entry::Vacant(v) => {
                v.insert(entry);
                Ok(())
            }
        }
    }

    /// Removes `entry` if it is still the registered watch for its key.
    pub(crate) fn remove_watch(
        &self,
        entry: &Arc<WatchEntry>,
    ) -> bool {
        self.watches
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    /// Whether `key` has no watch or a watch with an empty listener set.
    pub(crate) fn is_empty(
        &self,
        key: &ContainerKey,
    ) -> bool {
        self.listener_count(key) == 0
    }

    pub(crate) fn listener_count(
        &self,
        key: &ContainerKey,
    ) -> usize {
        self.get_watch(key).map(|e| e.listener_count()).unwrap_or(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.watches.len()
    }

    /// Any registered watch, used to drain the registry on shutdown.
    pub(crate) fn any_watch(&self) -> Option<Arc<WatchEntry>> {
        self.watches.iter().next().map(|e| e.value().clone())
    }

    #[cfg(test)]
    pub(crate) fn open_lock_count(&self) -> usize {
        self.open_locks.len()
    }
}
