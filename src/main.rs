use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use watchlog::async_task::spawn_task;
use watchlog::BackoffPolicy;
use watchlog::ContainerKey;
use watchlog::Error;
use watchlog::EventBus;
use watchlog::EventKind;
use watchlog::KubeLogSource;
use watchlog::LogListener;
use watchlog::MetricsSubscriber;
use watchlog::Result;
use watchlog::StopReason;
use watchlog::TracingListener;
use watchlog::WatchHandle;
use watchlog::WatchLog;
use watchlog::WatchLogConfig;
use watchlog::WatchLogEvent;
use watchlog::WatchTarget;

type Handles = Arc<DashMap<ContainerKey, WatchHandle>>;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config = WatchLogConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&config.server.log_dir)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let bus = Arc::new(EventBus::new());
    let _metrics = MetricsSubscriber::attach(&bus);
    if config.monitoring.prometheus_enabled {
        let endpoint = config.monitoring.endpoint();
        let rx = graceful_rx.clone();
        tokio::spawn(async move {
            info!(%endpoint, "serving metrics");
            watchlog::start_server(endpoint, rx).await;
        });
    }

    let source = KubeLogSource::try_default(config.kube.clone()).await?;
    let watch_log = WatchLog::new(Arc::new(source), bus.clone(), config.watch.clone());
    let listener: Arc<dyn LogListener> = Arc::new(TracingListener);
    let handles: Handles = Arc::new(DashMap::new());

    for target in &config.watch.targets {
        start_target(&watch_log, target, listener.clone(), config.retry.open, &handles).await;
    }

    spawn_reconnect(
        watch_log.clone(),
        listener.clone(),
        config.retry.reconnect,
        handles.clone(),
        graceful_rx.clone(),
    );

    info!(
        watches = watch_log.active_watch_count(),
        "Application started. Waiting for CTRL+C signal..."
    );
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    let mut shutdown_rx = graceful_rx.clone();
    let _ = shutdown_rx.changed().await;

    handles.clear();
    let drain = Duration::from_millis(config.server.shutdown_timeout_ms);
    if tokio::time::timeout(drain, watch_log.shutdown()).await.is_err() {
        warn!("watches still running after {:?}, exiting anyway", drain);
    }
    bus.close();

    info!("Exiting program.");
    Ok(())
}

async fn start_target(
    watch_log: &WatchLog,
    target: &WatchTarget,
    listener: Arc<dyn LogListener>,
    policy: BackoffPolicy,
    handles: &Handles,
) {
    match &target.container {
        Some(container) => {
            let key = ContainerKey::new(target.pod.clone(), container.clone());
            match watch_log.start_with_retry(key.clone(), listener, policy).await {
                Ok(handle) => {
                    handles.insert(key, handle);
                }
                Err(e) => error!(%key, "giving up on container: {}", e),
            }
        }
        None => match watch_log.start_pod(&target.pod, listener).await {
            Ok(pod_handles) => {
                for handle in pod_handles {
                    handles.insert(handle.key().clone(), handle);
                }
            }
            Err(e) => error!(pod = %target.pod, "failed to watch pod: {}", e),
        },
    }
}

/// Reopens watches that stopped with an error.
fn spawn_reconnect(
    watch_log: WatchLog,
    listener: Arc<dyn LogListener>,
    policy: BackoffPolicy,
    handles: Handles,
    mut shutdown: watch::Receiver<()>,
) {
    let (_, mut stopped) = watch_log.event_bus().subscribe_channel(EventKind::WatchStopped);
    spawn_task(
        "reconnect",
        move || async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    event = stopped.recv() => event,
                };
                let Some(WatchLogEvent::Stopped(event)) = event else {
                    return Ok(());
                };

                let key = event.key();
                // The old handle belongs to a finished watch
                if handles.remove(&key).is_none() || event.reason != StopReason::Error {
                    continue;
                }

                info!(%key, "log stream failed, reconnecting");
                match watch_log.start_with_retry(key.clone(), listener.clone(), policy).await {
                    Ok(handle) => {
                        handles.insert(key, handle);
                    }
                    Err(e) => error!(%key, "reconnect failed: {}", e),
                }
            }
        },
        None,
    );
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint =
        signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(format!("SIGINT handler: {e}")))?;
    let mut sigterm =
        signal(SignalKind::terminate()).map_err(|e| Error::Fatal(format!("SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    info!("Shutdown server..");
    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::SignalSenderClosed(format!("Failed to send shutdown signal: {}", e))
    })?;

    Ok(())
}

pub fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir).map_err(|e| Error::PathError {
        path: log_dir.to_path_buf(),
        source: e,
    })?;
    let log_file = tracing_appender::rolling::daily(log_dir, "watchlog.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
