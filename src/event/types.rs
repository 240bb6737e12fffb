use serde::Deserialize;
use serde::Serialize;

use crate::ContainerKey;
use crate::StopReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WatchStarted,
    WatchStopped,
}

/// Published once per watch, after its log stream is open and the delivery loop
/// is running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchLogStartedEvent {
    pub pod: String,
    pub container: String,
}

impl WatchLogStartedEvent {
    pub fn new(key: &ContainerKey) -> Self {
        Self {
            pod: key.pod.clone(),
            container: key.container.clone(),
        }
    }

    pub fn key(&self) -> ContainerKey {
        ContainerKey::new(self.pod.clone(), self.container.clone())
    }
}

/// Published exactly once per watch, after its log stream has been closed.
///
/// Two events are equal when they name the same container and reason; consumers
/// deduplicating stops should compare whole events, not just `container`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchLogStoppedEvent {
    pub pod: String,
    pub container: String,
    pub reason: StopReason,
}

impl WatchLogStoppedEvent {
    pub fn new(
        key: &ContainerKey,
        reason: StopReason,
    ) -> Self {
        Self {
            pod: key.pod.clone(),
            container: key.container.clone(),
            reason,
        }
    }

    pub fn key(&self) -> ContainerKey {
        ContainerKey::new(self.pod.clone(), self.container.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchLogEvent {
    Started(WatchLogStartedEvent),
    Stopped(WatchLogStoppedEvent),
}

impl WatchLogEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WatchLogEvent::Started(_) => EventKind::WatchStarted,
            WatchLogEvent::Stopped(_) => EventKind::WatchStopped,
        }
    }
}
