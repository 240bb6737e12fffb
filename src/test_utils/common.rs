use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::ContainerKey;
use crate::EventBus;
use crate::EventKind;
use crate::LogChunk;
use crate::LogListener;
use crate::StopReason;
use crate::StreamError;
use crate::WatchLogEvent;
use crate::WatchLogStoppedEvent;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Listener keeping everything it receives, in order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    chunks: Mutex<Vec<LogChunk>>,
    errors: Mutex<Vec<StreamError>>,
    stops: Mutex<Vec<StopReason>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn texts(&self) -> Vec<String> {
        self.chunks.lock().iter().map(|c| c.text()).collect()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.chunks.lock().iter().map(|c| c.sequence).collect()
    }

    pub fn errors(&self) -> Vec<StreamError> {
        self.errors.lock().clone()
    }

    pub fn stops(&self) -> Vec<StopReason> {
        self.stops.lock().clone()
    }
}

impl LogListener for RecordingListener {
    fn on_chunk(
        &self,
        _key: &ContainerKey,
        chunk: &LogChunk,
    ) {
        self.chunks.lock().push(chunk.clone());
    }

    fn on_error(
        &self,
        _key: &ContainerKey,
        error: &StreamError,
    ) {
        self.errors.lock().push(error.clone());
    }

    fn on_stop(
        &self,
        _key: &ContainerKey,
        reason: StopReason,
    ) {
        self.stops.lock().push(reason);
    }
}

/// Collects stop events published on `bus`.
pub fn stop_events(bus: &Arc<EventBus>) -> mpsc::UnboundedReceiver<WatchLogEvent> {
    bus.subscribe_channel(EventKind::WatchStopped).1
}

/// Waits for the next stop event, failing the test after one second.
pub async fn next_stop(rx: &mut mpsc::UnboundedReceiver<WatchLogEvent>) -> WatchLogStoppedEvent {
    match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
        Ok(Some(WatchLogEvent::Stopped(e))) => e,
        other => panic!("expected a stop event, got {:?}", other),
    }
}

/// Asserts no stop event arrives within a short grace period.
pub async fn assert_no_stop(rx: &mut mpsc::UnboundedReceiver<WatchLogEvent>) {
    if let Ok(event) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}

/// Polls `condition` every few milliseconds for up to one second.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 1s");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
