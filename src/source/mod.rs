//! Log stream sources.
//!
//! A [`LogSource`] opens one [`LogStream`] per container. The stream is owned by
//! the watch's delivery task and read with a cancellable pull, so removing the last
//! listener can interrupt a read that is waiting for the next line.

mod kubernetes;
pub use kubernetes::*;


use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;

use crate::ContainerKey;
use crate::SourceError;
use crate::StreamError;

/// Outcome of one read from a [`LogStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Chunk(Bytes),
    /// The container terminated or the server closed the stream
    EndOfStream,
    /// The read was cancelled through its token before data arrived
    Interrupted,
}

/// One open connection to a container's log output.
#[async_trait::async_trait]
pub trait LogStream: Send {
    /// Waits for the next chunk, returning `Interrupted` as soon as `cancel` fires.
    async fn next_chunk(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome, StreamError>;

    /// Releases the connection. Calling it more than once is a no-op.
    async fn close(&mut self);
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait LogSource: Send + Sync + 'static {
    async fn open(
        &self,
        key: &ContainerKey,
    ) -> Result<Box<dyn LogStream>, SourceError>;

    /// Containers and init containers declared by `pod`.
    async fn containers(
        &self,
        pod: &str,
    ) -> Result<Vec<String>, SourceError>;
}
