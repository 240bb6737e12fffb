use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

use crate::ContainerKey;
use crate::LogChunk;
use crate::StopReason;
use crate::StreamError;

/// Consumer of a container's log stream.
///
/// Callbacks run on the watch's delivery task, synchronously: every listener sees
/// a chunk before the next one is read from the source. Implementations must not
/// block; hand the data to a channel or task if work is needed.
#[cfg_attr(test, automock)]
pub trait LogListener: Send + Sync + 'static {
    fn on_chunk(
        &self,
        key: &ContainerKey,
        chunk: &LogChunk,
    );

    /// Out-of-band failure notice, delivered before `on_stop`.
    fn on_error(
        &self,
        _key: &ContainerKey,
        _error: &StreamError,
    ) {
    }

    /// Terminal notification for listeners still attached when the watch stops.
    fn on_stop(
        &self,
        _key: &ContainerKey,
        _reason: StopReason,
    ) {
    }
}

/// Message produced by [`ChannelListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogNotice {
    Chunk { key: ContainerKey, chunk: LogChunk },
    Error { key: ContainerKey, error: StreamError },
    Stopped { key: ContainerKey, reason: StopReason },
}

/// Listener forwarding everything into an unbounded channel.
///
/// Useful to bridge the synchronous delivery loop to async consumers such as a
/// websocket relay.
#[derive(Debug)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<LogNotice>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LogNotice>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }

    fn send(
        &self,
        notice: LogNotice,
    ) {
        // Receiver gone means the consumer lost interest; the handle owner stops the watch.
        let _ = self.sender.send(notice);
    }
}

impl LogListener for ChannelListener {
    fn on_chunk(
        &self,
        key: &ContainerKey,
        chunk: &LogChunk,
    ) {
        self.send(LogNotice::Chunk {
            key: key.clone(),
            chunk: chunk.clone(),
        });
    }

    fn on_error(
        &self,
        key: &ContainerKey,
        error: &StreamError,
    ) {
        self.send(LogNotice::Error {
            key: key.clone(),
            error: error.clone(),
        });
    }

    fn on_stop(
        &self,
        key: &ContainerKey,
        reason: StopReason,
    ) {
        self.send(LogNotice::Stopped {
            key: key.clone(),
            reason,
        });
    }
}

/// Diagnostics listener writing every line to the `watchlog::container` target.
#[derive(Debug, Default)]
pub struct TracingListener;

impl LogListener for TracingListener {
    fn on_chunk(
        &self,
        key: &ContainerKey,
        chunk: &LogChunk,
    ) {
        info!(
            target: "watchlog::container",
            pod = %key.pod,
            container = %key.container,
            seq = chunk.sequence,
            "{}",
            chunk.text()
        );
    }

    fn on_error(
        &self,
        key: &ContainerKey,
        error: &StreamError,
    ) {
        warn!(
            target: "watchlog::container",
            pod = %key.pod,
            container = %key.container,
            code = error.code,
            "log stream failed: {}",
            error.message
        );
    }

    fn on_stop(
        &self,
        key: &ContainerKey,
        reason: StopReason,
    ) {
        info!(
            target: "watchlog::container",
            pod = %key.pod,
            container = %key.container,
            %reason,
            "log stream stopped"
        );
    }
}
