use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ContainerKey;
use crate::LogSource;
use crate::LogStream;
use crate::ReadOutcome;
use crate::SourceError;
use crate::StreamError;

#[derive(Debug)]
enum FeedItem {
    Chunk(Bytes),
    End,
    Fail(String),
}

/// Test-side end of a scripted log stream.
///
/// Dropping the feed ends the stream.
#[derive(Debug, Clone)]
pub struct ScriptedFeed {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl ScriptedFeed {
    pub fn push(
        &self,
        line: &str,
    ) {
        let _ = self.tx.send(FeedItem::Chunk(Bytes::from(format!("{line}\n"))));
    }

    pub fn end(&self) {
        let _ = self.tx.send(FeedItem::End);
    }

    pub fn fail(
        &self,
        message: &str,
    ) {
        let _ = self.tx.send(FeedItem::Fail(message.to_string()));
    }
}

/// In-memory [`LogSource`] driven by [`ScriptedFeed`]s.
///
/// Each `open` consumes one feed registered for the key; keys without a pending
/// feed are reported as not found. Stream closes are written to a shared
/// journal so tests can check their order against other events.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    state: Mutex<ScriptedState>,
    journal: Arc<Mutex<Vec<String>>>,
}

#[derive(Debug, Default)]
struct ScriptedState {
    feeds: HashMap<ContainerKey, VecDeque<mpsc::UnboundedReceiver<FeedItem>>>,
    pods: HashMap<String, Vec<String>>,
    failing: HashMap<ContainerKey, SourceError>,
    opens: HashMap<ContainerKey, usize>,
    open_delay: Option<Duration>,
    close_delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a stream for the next `open` of `key`.
    pub fn feed(
        &self,
        key: &ContainerKey,
    ) -> ScriptedFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.feeds.entry(key.clone()).or_default().push_back(rx);
        let containers = state.pods.entry(key.pod.clone()).or_default();
        if !containers.contains(&key.container) {
            containers.push(key.container.clone());
        }
        ScriptedFeed { tx }
    }

    /// Declares a container of `pod` whose `open` fails with `error`.
    pub fn fail_open(
        &self,
        key: &ContainerKey,
        error: SourceError,
    ) {
        let mut state = self.state.lock();
        state.failing.insert(key.clone(), error);
        let containers = state.pods.entry(key.pod.clone()).or_default();
        if !containers.contains(&key.container) {
            containers.push(key.container.clone());
        }
    }

    /// Stops failing `key`; later opens use its queued feeds.
    pub fn recover(
        &self,
        key: &ContainerKey,
    ) {
        self.state.lock().failing.remove(key);
    }

    pub fn set_open_delay(
        &self,
        delay: Duration,
    ) {
        self.state.lock().open_delay = Some(delay);
    }

    pub fn set_close_delay(
        &self,
        delay: Duration,
    ) {
        self.state.lock().close_delay = Some(delay);
    }

    /// Number of `open` calls for `key`, successful or not.
    pub fn open_count(
        &self,
        key: &ContainerKey,
    ) -> usize {
        self.state.lock().opens.get(key).copied().unwrap_or(0)
    }

    pub fn journal(&self) -> Arc<Mutex<Vec<String>>> {
        self.journal.clone()
    }
}

#[async_trait::async_trait]
impl LogSource for ScriptedSource {
    async fn open(
        &self,
        key: &ContainerKey,
    ) -> Result<Box<dyn LogStream>, SourceError> {
        let open_delay = {
            let mut state = self.state.lock();
            *state.opens.entry(key.clone()).or_default() += 1;
            state.open_delay
        };
        if let Some(delay) = open_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(e) = state.failing.get(key) {
            return Err(e.clone());
        }
        let rx = state
            .feeds
            .get_mut(key)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| SourceError::NotFound {
                key: key.clone(),
                message: "no such container".to_string(),
            })?;
        self.journal.lock().push(format!("open:{key}"));

        Ok(Box::new(ScriptedStream {
            key: key.clone(),
            rx: Some(rx),
            close_delay: state.close_delay,
            journal: self.journal.clone(),
        }))
    }

    async fn containers(
        &self,
        pod: &str,
    ) -> Result<Vec<String>, SourceError> {
        self.state
            .lock()
            .pods
            .get(pod)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                key: ContainerKey::pod_only(pod),
                message: "no such pod".to_string(),
            })
    }
}

struct ScriptedStream {
    key: ContainerKey,
    rx: Option<mpsc::UnboundedReceiver<FeedItem>>,
    close_delay: Option<Duration>,
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl LogStream for ScriptedStream {
    async fn next_chunk(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome, StreamError> {
        let Some(rx) = self.rx.as_mut() else {
            return Ok(ReadOutcome::EndOfStream);
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(ReadOutcome::Interrupted),
            item = rx.recv() => match item {
                Some(FeedItem::Chunk(data)) => Ok(ReadOutcome::Chunk(data)),
                Some(FeedItem::End) | None => Ok(ReadOutcome::EndOfStream),
                Some(FeedItem::Fail(message)) => Err(StreamError::new(self.key.clone(), message)),
            },
        }
    }

    async fn close(&mut self) {
        if self.rx.take().is_none() {
            return;
        }
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.journal.lock().push(format!("close:{}", self.key));
    }
}
