use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::entry::Resume;
use super::entry::WatchEntry;
use super::registry::AddOutcome;
use super::registry::ListenerRegistry;
use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::ContainerKey;
use crate::Error;
use crate::EventBus;
use crate::LogChunk;
use crate::LogListener;
use crate::LogSource;
use crate::LogStream;
use crate::ReadOutcome;
use crate::Result;
use crate::StopReason;
use crate::StreamError;
use crate::WatchConfig;
use crate::WatchError;
use crate::WatchHandle;
use crate::WatchLogEvent;
use crate::WatchLogStartedEvent;
use crate::WatchLogStoppedEvent;
use crate::WatchState;
use crate::forget_container;
use crate::LOG_CHUNKS_DELIVERED;
use crate::SOURCE_OPEN_FAILURES;

/// Multiplexes container log streams across listeners.
///
/// One watch exists per [`ContainerKey`]. The first `start` for a key opens the
/// log stream and spawns its delivery task; later calls attach to it. Removing the
/// last listener tears the watch down, closes the stream and publishes exactly one
/// [`WatchLogStoppedEvent`].
///
/// Cloning is cheap and every clone drives the same set of watches.
#[derive(Clone)]
pub struct WatchLog {
    inner: Arc<WatchLogInner>,
}

struct WatchLogInner {
    source: Arc<dyn LogSource>,
    bus: Arc<EventBus>,
    registry: Arc<ListenerRegistry>,
    config: WatchConfig,
    shutdown: CancellationToken,
    /// Delivery tasks, drained by `shutdown`
    tasks: TaskTracker,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for WatchLog {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchLog")
            .field("watches", &self.inner.registry.len())
            .field("shutdown", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl WatchLog {
    pub fn new(
        source: Arc<dyn LogSource>,
        bus: Arc<EventBus>,
        config: WatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(WatchLogInner {
                source,
                bus,
                registry: Arc::new(ListenerRegistry::new()),
                config,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribes `listener` to the logs of `key`.
    ///
    /// Attaches to the existing watch when there is one, including an idle watch
    /// whose stream has not been closed yet. A watch that is already tearing down
    /// is waited for, then a fresh one is opened.
    ///
    /// # Errors
    /// - `WatchError::SourceUnavailable` when the container cannot be reached;
    ///   nothing is registered and no event is published.
    /// - `WatchError::ShuttingDown` after [`WatchLog::shutdown`].
    pub async fn start(
        &self,
        key: ContainerKey,
        listener: Arc<dyn LogListener>,
    ) -> Result<WatchHandle> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(WatchError::ShuttingDown.into());
        }
        let id = inner.next_listener_id.fetch_add(1, Ordering::Relaxed);

        let _key_lock = inner.registry.lock_key(&key).await;
        loop {
            match inner.registry.add_listener(&key, id, listener.clone()) {
                AddOutcome::Attached => {
                    debug!(%key, id, "joined existing watch");
                    return Ok(self.handle(key, id));
                }
                AddOutcome::Terminating(entry) => {
                    trace!(%key, "watch is tearing down, waiting for it to stop");
                    let terminated = entry.terminated();
                    drop(entry);
                    terminated.cancelled().await;
                }
                AddOutcome::Absent => break,
            }
        }

        if inner.shutdown.is_cancelled() {
            return Err(WatchError::ShuttingDown.into());
        }

        let mut stream = match inner.source.open(&key).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%key, "failed to open log stream: {}", e);
                SOURCE_OPEN_FAILURES
                    .with_label_values(&[&e.status_code().to_string()])
                    .inc();
                return Err(e.into());
            }
        };

        let entry = Arc::new(WatchEntry::new(key.clone(), (id, listener), inner.shutdown.clone()));
        if let Err(e) = inner.registry.insert(entry.clone()) {
            error!(%key, "{}", e);
            stream.close().await;
            return Err(e.into());
        }

        // Checked after insert: a shutdown that missed the entry in the registry
        // cancelled before this point
        if inner.shutdown.is_cancelled() {
            inner.registry.remove_watch(&entry);
            stream.close().await;
            entry.mark_stopped();
            entry.finish();
            return Err(WatchError::ShuttingDown.into());
        }

        info!(%key, "watch started");
        inner.tasks.spawn(run_watch(inner.clone(), entry, stream));
        Ok(self.handle(key, id))
    }

    /// Unsubscribes the listener behind `handle`. Safe to call more than once;
    /// dropping the handle has the same effect.
    pub fn stop(
        &self,
        handle: &WatchHandle,
    ) {
        if handle.release() {
            let key = handle.key();
            debug!(%key, id = handle.id(), idle = self.inner.registry.is_empty(key), "listener detached");
        }
    }

    /// [`WatchLog::start`] retried with exponential backoff while the source is
    /// unavailable.
    pub async fn start_with_retry(
        &self,
        key: ContainerKey,
        listener: Arc<dyn LogListener>,
        policy: BackoffPolicy,
    ) -> Result<WatchHandle> {
        task_with_timeout_and_exponential_backoff(|| self.start(key.clone(), listener.clone()), policy).await
    }

    /// Watches every container and init container of `pod`.
    ///
    /// Containers that cannot be opened are reported to `listener` through
    /// [`LogListener::on_error`] and skipped. Fails only when the pod itself cannot
    /// be inspected.
    pub async fn start_pod(
        &self,
        pod: &str,
        listener: Arc<dyn LogListener>,
    ) -> Result<Vec<WatchHandle>> {
        let containers = self.inner.source.containers(pod).await?;
        debug!(pod, ?containers, "watching pod");

        let starts = containers.into_iter().map(|container| {
            let key = ContainerKey::new(pod, container);
            let listener = listener.clone();
            async move { (key.clone(), self.start(key, listener).await) }
        });

        let mut handles = Vec::new();
        for (key, result) in join_all(starts).await {
            match result {
                Ok(handle) => handles.push(handle),
                Err(Error::Watch(WatchError::SourceUnavailable(e))) => {
                    listener.on_error(&key, &StreamError::from(&e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(handles)
    }

    pub fn is_watching(
        &self,
        key: &ContainerKey,
    ) -> bool {
        self.inner.registry.get_watch(key).is_some()
    }

    pub fn watch_state(
        &self,
        key: &ContainerKey,
    ) -> Option<WatchState> {
        self.inner.registry.get_watch(key).map(|e| e.state())
    }

    pub fn listener_count(
        &self,
        key: &ContainerKey,
    ) -> usize {
        self.inner.registry.listener_count(key)
    }

    /// Number of registered watches, including ones being torn down.
    pub fn active_watch_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Cancels every watch and waits until all of them reached `Stopped`.
    ///
    /// Further `start` calls fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        info!(watches = inner.registry.len(), "shutting down watch log");

        while let Some(entry) = inner.registry.any_watch() {
            let terminated = entry.terminated();
            drop(entry);
            terminated.cancelled().await;
        }
        inner.tasks.close();
        inner.tasks.wait().await;
        info!("all watches stopped");
    }

    fn handle(
        &self,
        key: ContainerKey,
        id: u64,
    ) -> WatchHandle {
        WatchHandle::new(key, id, Arc::downgrade(&self.inner.registry))
    }
}

/// Delivery loop of one watch. Owns the stream until it is closed.
async fn run_watch(
    inner: Arc<WatchLogInner>,
    entry: Arc<WatchEntry>,
    mut stream: Box<dyn LogStream>,
) {
    let key = entry.key().clone();
    entry.mark_active();
    inner
        .bus
        .publish(WatchLogEvent::Started(WatchLogStartedEvent::new(&key)));

    let delivered = LOG_CHUNKS_DELIVERED.with_label_values(&[&key.pod, &key.container]);
    let mut sequence = 0u64;
    let (reason, failure) = loop {
        let cancel = entry.read_token();
        match stream.next_chunk(&cancel).await {
            Ok(ReadOutcome::Chunk(data)) => {
                let chunk = LogChunk::new(sequence, data);
                sequence += 1;
                for listener in entry.listeners() {
                    listener.on_chunk(&key, &chunk);
                }
                delivered.inc();

                let consistency = entry.check_consistency();
                debug_assert!(consistency.is_ok(), "{:?}", consistency);
                if let Err(e) = consistency {
                    error!(%key, "{}, tearing the watch down", e);
                    break (StopReason::Cancelled, None);
                }
            }
            Ok(ReadOutcome::EndOfStream) => {
                debug!(%key, "log stream ended");
                break (StopReason::Completed, None);
            }
            Ok(ReadOutcome::Interrupted) => match entry.on_interrupted() {
                Resume::Continue => {
                    debug!(%key, "idle watch revived");
                }
                Resume::Teardown => break (StopReason::Cancelled, None),
            },
            Err(e) => {
                warn!(%key, "log stream failed: {}", e);
                break (StopReason::Error, Some(e));
            }
        }
    };

    let listeners = entry.begin_stop(reason);
    if let Some(e) = &failure {
        for listener in &listeners {
            listener.on_error(&key, e);
        }
    }

    let close_timeout = Duration::from_millis(inner.config.close_timeout_ms);
    if timeout(close_timeout, stream.close()).await.is_err() {
        warn!(%key, "closing log stream timed out after {:?}", close_timeout);
    }
    drop(stream);

    entry.mark_stopped();
    // Before removal, while a new watch for this key cannot exist yet
    forget_container(&key);
    inner.registry.remove_watch(&entry);
    for listener in &listeners {
        listener.on_stop(&key, reason);
    }

    info!(%key, %reason, "watch stopped");
    inner
        .bus
        .publish(WatchLogEvent::Stopped(WatchLogStoppedEvent::new(&key, reason)));
    entry.finish();
}
