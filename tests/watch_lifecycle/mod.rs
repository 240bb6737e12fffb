use std::time::Duration;

use tokio::sync::mpsc;
use watchlog::ChannelListener;
use watchlog::ContainerKey;
use watchlog::EventKind;
use watchlog::LogNotice;
use watchlog::StopReason;
use watchlog::WatchLogEvent;
use watchlog::WatchLogStoppedEvent;

use crate::common::setup;

async fn recv<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(item) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        panic!("unexpected item: {:?}", item);
    }
}

fn line(notice: LogNotice) -> String {
    match notice {
        LogNotice::Chunk { chunk, .. } => chunk.text(),
        other => panic!("expected a chunk, got {:?}", other),
    }
}

#[tokio::test]
async fn three_chunks_then_unsubscribe() {
    let (source, bus, watch_log) = setup();
    let (_sub, mut stops) = bus.subscribe_channel(EventKind::WatchStopped);
    let app = ContainerKey::new("workspace-7f3", "app");
    let feed = source.container(&app);

    let (l1, mut rx1) = ChannelListener::new();
    let h1 = watch_log.start(app.clone(), l1).await.unwrap();
    for l in ["a", "b", "c"] {
        feed.send(Some(l.to_string())).unwrap();
    }

    assert_eq!(line(recv(&mut rx1).await), "a");
    assert_eq!(line(recv(&mut rx1).await), "b");
    assert_eq!(line(recv(&mut rx1).await), "c");

    watch_log.stop(&h1);
    assert_eq!(
        recv(&mut stops).await,
        WatchLogEvent::Stopped(WatchLogStoppedEvent::new(&app, StopReason::Cancelled))
    );
    assert_quiet(&mut stops).await;
    assert_eq!(*source.closed.lock(), vec![app]);
}

#[tokio::test]
async fn two_listeners_one_leaves() {
    let (source, bus, watch_log) = setup();
    let (_sub, mut stops) = bus.subscribe_channel(EventKind::WatchStopped);
    let app = ContainerKey::new("workspace-7f3", "app");
    let feed = source.container(&app);

    let (l1, mut rx1) = ChannelListener::new();
    let (l2, mut rx2) = ChannelListener::new();
    let h1 = watch_log.start(app.clone(), l1).await.unwrap();
    let h2 = watch_log.start(app.clone(), l2).await.unwrap();

    watch_log.stop(&h1);
    assert_quiet(&mut stops).await;

    feed.send(Some("after l1 left".to_string())).unwrap();
    assert_eq!(line(recv(&mut rx2).await), "after l1 left");
    assert_quiet(&mut rx1).await;

    watch_log.stop(&h2);
    assert_eq!(recv(&mut stops).await.kind(), EventKind::WatchStopped);
    assert_quiet(&mut stops).await;
}

#[tokio::test]
async fn nonexistent_container_is_unavailable() {
    let (_source, bus, watch_log) = setup();
    let (_sub, mut stops) = bus.subscribe_channel(EventKind::WatchStopped);
    let (listener, _rx) = ChannelListener::new();

    let err = watch_log
        .start(ContainerKey::new("workspace-7f3", "ghost"), listener)
        .await
        .unwrap_err();

    assert!(err.is_source_unavailable());
    assert_quiet(&mut stops).await;
}

#[tokio::test]
async fn end_of_stream_races_unsubscribe() {
    let (source, bus, watch_log) = setup();
    let (_sub, mut stops) = bus.subscribe_channel(EventKind::WatchStopped);
    let app = ContainerKey::new("workspace-7f3", "app");
    let feed = source.container(&app);
    let (listener, _rx) = ChannelListener::new();
    let handle = watch_log.start(app.clone(), listener).await.unwrap();

    let (_, _) = tokio::join!(async { feed.send(None) }, async { watch_log.stop(&handle) });

    match recv(&mut stops).await {
        WatchLogEvent::Stopped(e) => {
            assert_eq!(e.key(), app);
            assert!(matches!(e.reason, StopReason::Completed | StopReason::Cancelled));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_quiet(&mut stops).await;
    assert!(!watch_log.is_watching(&app));
}

#[tokio::test]
async fn completed_container_notifies_listener() {
    let (source, bus, watch_log) = setup();
    let (_sub, mut stops) = bus.subscribe_channel(EventKind::WatchStopped);
    let init = ContainerKey::new("workspace-7f3", "plugin-broker");
    let feed = source.container(&init);

    let (listener, mut rx) = ChannelListener::new();
    let _handles = watch_log.start_pod("workspace-7f3", listener).await.unwrap();
    feed.send(Some("plugins resolved".to_string())).unwrap();
    feed.send(None).unwrap();

    assert_eq!(line(recv(&mut rx).await), "plugins resolved");
    assert_eq!(
        recv(&mut rx).await,
        LogNotice::Stopped {
            key: init.clone(),
            reason: StopReason::Completed
        }
    );
    assert_eq!(
        recv(&mut stops).await,
        WatchLogEvent::Stopped(WatchLogStoppedEvent::new(&init, StopReason::Completed))
    );
}
