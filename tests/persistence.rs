mod common;

use common::{channel, guild, user, Harness};
use pretty_assertions::assert_eq;
use rat_music::{
    audio::{player::EngineSettings, queue::LoopMode},
    storage::JsonQueueStore,
};
use std::{sync::Arc, time::Duration};

#[tokio::test]
async fn disconnect_persists_and_reconnect_restores() {
    let dir = tempfile::tempdir().unwrap();

    {
        let h = Harness::with_store(
            EngineSettings::default(),
            Arc::new(JsonQueueStore::new(dir.path().to_path_buf()).await.unwrap()),
        );
        h.connect().await;
        h.enqueue("A").await;
        h.enqueue("B").await;
        h.enqueue("C").await;
        h.controller.set_volume(guild(), 70).await.unwrap();
        h.controller.set_loop_mode(guild(), LoopMode::Queue).unwrap();

        h.controller.disconnect(guild()).await.unwrap();
        assert!(h.controller.snapshot(guild()).is_none());
    }

    let h = Harness::with_store(
        EngineSettings::default(),
        Arc::new(JsonQueueStore::new(dir.path().to_path_buf()).await.unwrap()),
    );
    h.connect().await;

    let snapshot = h.controller.snapshot(guild()).unwrap();
    assert_eq!(snapshot.current.map(|t| t.title).as_deref(), Some("A"));
    let queued: Vec<_> = snapshot.upcoming.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(queued, vec!["B", "C"]);
    assert_eq!(snapshot.volume, 70);
    assert_eq!(snapshot.loop_mode, LoopMode::Queue);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_start_keeps_track_queued() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.transport.set_play_delay(Duration::from_secs(1));

    let controller = h.controller.clone();
    let pending = tokio::spawn(async move { controller.enqueue(guild(), "A", user(1)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.controller.disconnect(guild()).await.unwrap();
    let outcome = pending.await.unwrap().unwrap();
    assert!(outcome.started.is_none());
    assert_eq!(h.transport.active(guild()), None);

    h.controller.connect(guild(), channel()).await.unwrap();
    assert_eq!(h.current_title().as_deref(), Some("A"));
}

#[tokio::test(start_paused = true)]
async fn clear_during_start_drops_pending_track() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.transport.set_play_delay(Duration::from_secs(1));

    let controller = h.controller.clone();
    let pending = tokio::spawn(async move { controller.enqueue(guild(), "A", user(1)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.controller.clear_queue(guild()).await.unwrap(), 0);
    let outcome = pending.await.unwrap().unwrap();
    assert!(outcome.started.is_none());

    let snapshot = h.controller.snapshot(guild()).unwrap();
    assert_eq!(snapshot.current, None);
    assert_eq!(snapshot.queue_len, 0);
    assert_eq!(h.transport.active(guild()), None);
}
