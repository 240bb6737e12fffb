use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ContainerKey;
use crate::LogListener;
use crate::StopReason;
use crate::WatchError;
use crate::WatchState;

pub(crate) type ListenerId = u64;

/// Result of attaching a listener to an existing watch.
pub(crate) enum Attach {
    Attached,
    /// Teardown already committed; wait for `terminated()` and open a new watch.
    Terminating,
}

/// Result of detaching a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detach {
    Removed,
    /// The last listener left; the delivery loop has been woken.
    Drained,
    NotFound,
}

/// What the delivery loop does after its pending read was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    /// Listeners came back before the source was closed
    Continue,
    /// Still no listeners; teardown committed
    Teardown,
}

/// One live watch: its listener set and lifecycle.
///
/// The source itself is owned by the delivery task; this struct only carries the
/// state shared between that task and callers of `start`/`stop`.
pub(crate) struct WatchEntry {
    key: ContainerKey,
    inner: Mutex<EntryInner>,
    /// Parent of every per-read token; cancelled on shutdown
    shutdown: CancellationToken,
    /// Cancelled once the watch reached `Stopped`
    terminated: CancellationToken,
}

struct EntryInner {
    state: WatchState,
    listeners: Vec<(ListenerId, Arc<dyn LogListener>)>,
    /// Cancels the read currently pending in the delivery loop
    read_cancel: CancellationToken,
    /// Listener set drained and the loop has not reacted yet
    idle_pending: bool,
    reason: Option<StopReason>,
}

impl WatchEntry {
    pub(crate) fn new(
        key: ContainerKey,
        first: (ListenerId, Arc<dyn LogListener>),
        shutdown: CancellationToken,
    ) -> Self {
        let read_cancel = shutdown.child_token();
        Self {
            key,
            inner: Mutex::new(EntryInner {
                state: WatchState::Starting,
                listeners: vec![first],
                read_cancel,
                idle_pending: false,
                reason: None,
            }),
            shutdown,
            terminated: CancellationToken::new(),
        }
    }

    pub(crate) fn key(&self) -> &ContainerKey {
        &self.key
    }

    pub(crate) fn state(&self) -> WatchState {
        self.inner.lock().state
    }

    pub(crate) fn reason(&self) -> Option<StopReason> {
        self.inner.lock().reason
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub(crate) fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    pub(crate) fn attach(
        &self,
        id: ListenerId,
        listener: Arc<dyn LogListener>,
    ) -> Attach {
        let mut inner = self.inner.lock();
        match inner.state {
            WatchState::Stopping | WatchState::Stopped => Attach::Terminating,
            WatchState::Starting | WatchState::Active => {
                inner.listeners.push((id, listener));
                Attach::Attached
            }
        }
    }

    pub(crate) fn detach(
        &self,
        id: ListenerId,
    ) -> Detach {
        let mut inner = self.inner.lock();
        let Some(pos) = inner.listeners.iter().position(|(lid, _)| *lid == id) else {
            return Detach::NotFound;
        };
        inner.listeners.remove(pos);

        if !inner.listeners.is_empty() {
            return Detach::Removed;
        }
        if matches!(inner.state, WatchState::Starting | WatchState::Active) {
            inner.idle_pending = true;
            inner.read_cancel.cancel();
        }
        Detach::Drained
    }

    /// Snapshot of the current listeners, taken for one delivery round.
    pub(crate) fn listeners(&self) -> Vec<Arc<dyn LogListener>> {
        self.inner.lock().listeners.iter().map(|(_, l)| l.clone()).collect()
    }

    /// Token the next source read should observe.
    pub(crate) fn read_token(&self) -> CancellationToken {
        self.inner.lock().read_cancel.clone()
    }

    pub(crate) fn mark_active(&self) {
        let mut inner = self.inner.lock();
        if inner.state == WatchState::Starting {
            inner.state = WatchState::Active;
        }
    }

    /// Called by the delivery loop when a read returned `Interrupted`.
    pub(crate) fn on_interrupted(&self) -> Resume {
        let mut inner = self.inner.lock();
        if self.shutdown.is_cancelled() || inner.listeners.is_empty() {
            inner.state = WatchState::Stopping;
            return Resume::Teardown;
        }

        inner.idle_pending = false;
        if inner.read_cancel.is_cancelled() {
            inner.read_cancel = self.shutdown.child_token();
        }
        Resume::Continue
    }

    /// Commits teardown and hands back the listeners that must be notified.
    pub(crate) fn begin_stop(
        &self,
        reason: StopReason,
    ) -> Vec<Arc<dyn LogListener>> {
        let mut inner = self.inner.lock();
        inner.state = WatchState::Stopping;
        inner.reason = Some(reason);
        inner.idle_pending = false;
        inner.listeners.drain(..).map(|(_, l)| l).collect()
    }

    pub(crate) fn mark_stopped(&self) {
        self.inner.lock().state = WatchState::Stopped;
    }

    pub(crate) fn finish(&self) {
        self.terminated.cancel();
    }

    #[cfg(test)]
    pub(crate) fn force_state(
        &self,
        state: WatchState,
    ) {
        self.inner.lock().state = state;
    }

    /// An active watch must either have listeners or be about to react to
    /// their removal.
    pub(crate) fn check_consistency(&self) -> Result<(), WatchError> {
        let inner = self.inner.lock();
        if inner.state == WatchState::Active && inner.listeners.is_empty() && !inner.idle_pending {
            return Err(WatchError::RegistryInconsistency {
                key: self.key.clone(),
                detail: "active watch has no listeners and no pending teardown".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for WatchEntry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WatchEntry")
            .field("key", &self.key)
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .field("reason", &inner.reason)
            .finish_non_exhaustive()
    }
}
