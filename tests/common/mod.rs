use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use watchlog::ContainerKey;
use watchlog::EventBus;
use watchlog::LogSource;
use watchlog::LogStream;
use watchlog::ReadOutcome;
use watchlog::SourceError;
use watchlog::StreamError;
use watchlog::WatchConfig;
use watchlog::WatchLog;

/// Lines written by the test; `None` ends the stream.
pub type Feed = mpsc::UnboundedSender<Option<String>>;

/// Source whose containers are declared up front by the test.
#[derive(Default)]
pub struct ChannelSource {
    pending: Mutex<HashMap<ContainerKey, mpsc::UnboundedReceiver<Option<String>>>>,
    pub closed: Arc<Mutex<Vec<ContainerKey>>>,
}

impl ChannelSource {
    pub fn container(
        &self,
        key: &ContainerKey,
    ) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().insert(key.clone(), rx);
        tx
    }
}

#[async_trait::async_trait]
impl LogSource for ChannelSource {
    async fn open(
        &self,
        key: &ContainerKey,
    ) -> Result<Box<dyn LogStream>, SourceError> {
        let rx = self.pending.lock().remove(key).ok_or_else(|| SourceError::NotFound {
            key: key.clone(),
            message: format!("container {} not found", key.container),
        })?;
        Ok(Box::new(ChannelStream {
            key: key.clone(),
            rx: Some(rx),
            closed: self.closed.clone(),
        }))
    }

    async fn containers(
        &self,
        pod: &str,
    ) -> Result<Vec<String>, SourceError> {
        Ok(self
            .pending
            .lock()
            .keys()
            .filter(|k| k.pod == pod)
            .map(|k| k.container.clone())
            .collect())
    }
}

struct ChannelStream {
    key: ContainerKey,
    rx: Option<mpsc::UnboundedReceiver<Option<String>>>,
    closed: Arc<Mutex<Vec<ContainerKey>>>,
}

#[async_trait::async_trait]
impl LogStream for ChannelStream {
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
            line = rx.recv() => Ok(match line.flatten() {
                Some(line) => ReadOutcome::Chunk(Bytes::from(line + "\n")),
                None => ReadOutcome::EndOfStream,
            }),
        }
    }

    async fn close(&mut self) {
        if self.rx.take().is_some() {
            self.closed.lock().push(self.key.clone());
        }
    }
}

pub fn setup() -> (Arc<ChannelSource>, Arc<EventBus>, WatchLog) {
    crate::enable_logger();
    let source = Arc::new(ChannelSource::default());
    let bus = Arc::new(EventBus::new());
    let config = WatchConfig {
        close_timeout_ms: 500,
        ..WatchConfig::default()
    };
    let watch_log = WatchLog::new(source.clone(), bus.clone(), config);
    (source, bus, watch_log)
}
