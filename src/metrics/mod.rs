//! Prometheus metrics.
//!
//! Watch lifecycle gauges are maintained by [`MetricsSubscriber`] from events on
//! the [`EventBus`]; per-chunk and open-failure counters are bumped directly by
//! the watch code.


use std::net::SocketAddr;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::trace;
use tracing::warn;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use crate::ContainerKey;
use crate::EventBus;
use crate::EventKind;
use crate::Subscription;
use crate::WatchLogEvent;

lazy_static! {
    pub static ref ACTIVE_WATCHES: IntGauge =
        IntGauge::new("active_watches", "Number of running container log watches")
            .expect("metric can not be created");

    pub static ref WATCHES_STARTED_TOTAL: IntCounter =
        IntCounter::new("watches_started_total", "Watches whose log stream was opened")
            .expect("metric can not be created");

    pub static ref WATCHES_STOPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("watches_stopped_total", "Watches stopped, by stop reason"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref LOG_CHUNKS_DELIVERED: IntCounterVec = IntCounterVec::new(
        Opts::new("log_chunks_delivered_total", "Log chunks fanned out to listeners"),
        &["pod", "container"]
    )
    .expect("metric can not be created");

    pub static ref SOURCE_OPEN_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("source_open_failures_total", "Failed attempts to open a log stream, by status code"),
        &["code"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("watchlog".to_string()), None).expect("registry can be created");
}

/// Registers every collector of this module with `registry`.
pub fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_WATCHES.clone()),
        Box::new(WATCHES_STARTED_TOTAL.clone()),
        Box::new(WATCHES_STOPPED_TOTAL.clone()),
        Box::new(LOG_CHUNKS_DELIVERED.clone()),
        Box::new(SOURCE_OPEN_FAILURES.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {}", e);
        }
    }
}

/// Drops the per-container series of a stopped watch.
pub(crate) fn forget_container(key: &ContainerKey) {
    if let Err(e) = LOG_CHUNKS_DELIVERED.remove_label_values(&[&key.pod, &key.container]) {
        trace!(%key, "no chunk series to remove: {}", e);
    }
}

/// Keeps the lifecycle metrics in sync with watch events.
#[derive(Debug)]
pub struct MetricsSubscriber;

impl MetricsSubscriber {
    pub fn attach(bus: &EventBus) -> Vec<Subscription> {
        vec![
            bus.subscribe(EventKind::WatchStarted, |_| {
                ACTIVE_WATCHES.inc();
                WATCHES_STARTED_TOTAL.inc();
            }),
            bus.subscribe(EventKind::WatchStopped, |event| {
                if let WatchLogEvent::Stopped(stopped) = event {
                    ACTIVE_WATCHES.dec();
                    WATCHES_STOPPED_TOTAL
                        .with_label_values(&[stopped.reason.as_str()])
                        .inc();
                }
            }),
        ]
    }
}

pub async fn start_server(
    addr: SocketAddr,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics")
        .map(|| REGISTRY.clone())
        .and_then(metrics_handler);

    let (_, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_signal.changed().await;
    });
    server.await;
}

async fn metrics_handler(registry: Registry) -> Result<impl Reply, Rejection> {
    let mut res = encode(&registry.gather());
    res.push_str(&encode(&prometheus::gather()));
    Ok(res)
}

fn encode(families: &[prometheus::proto::MetricFamily]) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(families, &mut buffer) {
        error!("could not encode metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
