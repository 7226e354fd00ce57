mod common;

use common::{guild, user, Harness};
use pretty_assertions::assert_eq;
use rat_music::audio::{
    inactivity::IdleReason,
    player::{CloseReason, EngineSettings, PlaybackNotice},
};
use rat_music::error::{ControllerError, ResolutionError};
use std::time::Duration;

fn settings() -> EngineSettings {
    EngineSettings {
        listeners_left_timeout: Duration::from_secs(60),
        queue_exhausted_timeout: Duration::from_secs(60),
        ..EngineSettings::default()
    }
}

async fn wait_for_close(h: &mut Harness) -> CloseReason {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match h.notices.recv().await {
                Some(PlaybackNotice::SessionClosed { reason, .. }) => return reason,
                Some(_) => continue,
                None => panic!("canal de avisos cerrado"),
            }
        }
    })
    .await
    .expect("la sesión no se cerró")
}

#[tokio::test(start_paused = true)]
async fn exhausted_queue_disconnects_after_timeout() {
    let mut h = Harness::new(settings());
    h.run_events();
    h.connect().await;
    h.enqueue("A").await;
    h.finish_current().await;

    let reason = wait_for_close(&mut h).await;

    assert_eq!(reason, CloseReason::Idle(IdleReason::QueueExhausted));
    assert!(h.controller.snapshot(guild()).is_none());
    assert_eq!(h.transport.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn enqueue_before_expiry_keeps_session() {
    let mut h = Harness::new(settings());
    h.run_events();
    h.connect().await;
    h.enqueue("A").await;
    h.finish_current().await;

    tokio::time::sleep(Duration::from_secs(55)).await;
    h.enqueue("B").await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.current_title().as_deref(), Some("B"));
    assert!(!h
        .drain_notices()
        .iter()
        .any(|n| matches!(n, PlaybackNotice::SessionClosed { .. })));
}

#[tokio::test(start_paused = true)]
async fn expiry_is_revalidated_before_teardown() {
    let mut h = Harness::new(settings());
    h.run_events();
    h.connect().await;
    h.enqueue("A").await;

    // Expira mientras hay reproducción activa
    h.controller
        .inactivity()
        .arm(guild(), IdleReason::QueueExhausted, Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.current_title().as_deref(), Some("A"));
    assert!(!h.controller.inactivity().is_armed(guild(), IdleReason::QueueExhausted));
    assert_eq!(h.transport.releases(), 0);
}

#[tokio::test(start_paused = true)]
async fn listeners_returning_cancel_disconnect() {
    let mut h = Harness::new(settings());
    h.run_events();
    h.connect().await;
    h.enqueue("A").await;

    h.controller.update_listeners(guild(), 0);
    tokio::time::sleep(Duration::from_secs(30)).await;
    h.controller.update_listeners(guild(), 2);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(h.controller.snapshot(guild()).is_some());

    h.controller.update_listeners(guild(), 0);
    let reason = wait_for_close(&mut h).await;
    assert_eq!(reason, CloseReason::Idle(IdleReason::ListenersLeft));
}

#[tokio::test(start_paused = true)]
async fn connect_without_tracks_disconnects_after_timeout() {
    let mut h = Harness::new(settings());
    h.run_events();
    h.connect().await;

    let failed = h.controller.enqueue(guild(), "yt:", user(1)).await;
    assert!(matches!(
        failed,
        Err(ControllerError::Resolution(ResolutionError::EmptyQuery))
    ));
    assert!(h.controller.inactivity().is_armed(guild(), IdleReason::QueueExhausted));

    let reason = wait_for_close(&mut h).await;
    assert_eq!(reason, CloseReason::Idle(IdleReason::QueueExhausted));
    assert_eq!(h.transport.releases(), 1);
}
