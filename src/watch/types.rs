use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

/// Identifies a watch target: a container inside a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerKey {
    pub pod: String,
    pub container: String,
}

impl ContainerKey {
    pub fn new(
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            pod: pod.into(),
            container: container.into(),
        }
    }

    /// Key used for failures that concern the pod as a whole.
    pub(crate) fn pod_only(pod: &str) -> Self {
        Self::new(pod, "")
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.pod, self.container)
    }
}

/// One unit of raw log output.
///
/// `sequence` starts at 0 for every watch and increases by one per chunk read
/// from the source, so listeners can detect where they joined the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub sequence: u64,
    pub data: Bytes,
}

impl LogChunk {
    pub fn new(
        sequence: u64,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            sequence,
            data: data.into(),
        }
    }

    /// Lossy UTF-8 view of the chunk, trailing newline removed.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).trim_end_matches(['\r', '\n']).to_string()
    }
}

/// Lifecycle of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchState {
    /// Source open, delivery loop not running yet
    Starting,
    /// Delivery loop running (possibly idle with no listeners)
    Active,
    /// Teardown committed, source being closed
    Stopping,
    /// Source closed, watch removed
    Stopped,
}

/// Why a watch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopReason {
    /// The log stream ended (container terminated or stream closed by the server)
    Completed,
    /// The last listener unsubscribed or the watch log was shut down
    Cancelled,
    /// Reading from the log stream failed
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::Cancelled => "cancelled",
            StopReason::Error => "error",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
