mod common;

use common::{guild, user, Harness};
use pretty_assertions::assert_eq;
use rat_music::{
    audio::{
        player::{EngineSettings, PlaybackNotice, SkipOutcome},
        queue::LoopMode,
        session::PlaybackPhase,
        track::Provider,
        votes::VoteOutcome,
    },
    error::ControllerError,
};
use std::time::Duration;

#[tokio::test]
async fn tracks_play_in_request_order() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;

    h.enqueue("A").await;
    h.enqueue("B").await;
    h.enqueue("C").await;
    assert_eq!(h.current_title().as_deref(), Some("A"));

    h.finish_current().await;
    assert_eq!(h.current_title().as_deref(), Some("B"));
    h.finish_current().await;
    assert_eq!(h.current_title().as_deref(), Some("C"));
    h.finish_current().await;

    assert_eq!(h.transport.titles(), vec!["A", "B", "C"]);
    assert_eq!(h.transport.overlaps(), 0);

    let snapshot = h.controller.snapshot(guild()).unwrap();
    assert_eq!(snapshot.current, None);
    assert_eq!(snapshot.phase, PlaybackPhase::Idle);
    assert_eq!(snapshot.tracks_played, 3);
}

#[tokio::test]
async fn enqueue_reports_positions_and_start() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;

    let first = h.controller.enqueue(guild(), "A", user(1)).await.unwrap();
    assert_eq!(first.started.map(|t| t.title).as_deref(), Some("A"));
    assert!(first.queued.is_empty());

    let second = h.controller.enqueue(guild(), "B", user(2)).await.unwrap();
    assert!(second.started.is_none());
    assert_eq!(second.queued.len(), 1);
    assert_eq!(second.queued[0].0, 1);
    assert_eq!(second.queued[0].1.title, "B");
}

#[tokio::test(start_paused = true)]
async fn concurrent_track_end_advances_once() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.enqueue("A").await;
    h.enqueue("B").await;
    h.enqueue("C").await;

    h.transport.set_play_delay(Duration::from_millis(50));
    let play_id = h.transport.finish(guild()).unwrap();

    tokio::join!(
        h.controller.on_track_end(guild(), play_id, None),
        h.controller.on_track_end(guild(), play_id, None),
    );

    assert_eq!(h.transport.titles(), vec!["A", "B"]);
    assert_eq!(h.current_title().as_deref(), Some("B"));
    assert_eq!(h.controller.snapshot(guild()).unwrap().queue_len, 1);
}

#[tokio::test]
async fn loop_track_replays_without_history() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.controller.set_loop_mode(guild(), LoopMode::Track).unwrap();
    h.enqueue("A").await;
    h.enqueue("B").await;

    for _ in 0..3 {
        h.finish_current().await;
    }

    assert_eq!(h.transport.titles(), vec!["A", "A", "A", "A"]);
    let snapshot = h.controller.snapshot(guild()).unwrap();
    assert!(snapshot.history.is_empty());
    assert_eq!(snapshot.queue_len, 1);
    assert_eq!(snapshot.tracks_played, 3);
}

#[tokio::test]
async fn skip_in_loop_track_moves_on() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.controller.set_loop_mode(guild(), LoopMode::Track).unwrap();
    h.enqueue("A").await;
    h.enqueue("B").await;

    let outcome = h.controller.skip(guild(), user(1), false, 3).await.unwrap();
    assert!(matches!(outcome, SkipOutcome::Skipped { by_vote: false, .. }));
    assert_eq!(h.current_title().as_deref(), Some("B"));
}

#[tokio::test]
async fn loop_queue_refills_from_history() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.controller.set_loop_mode(guild(), LoopMode::Queue).unwrap();
    h.enqueue("A").await;
    h.enqueue("B").await;

    h.finish_current().await;
    h.finish_current().await;
    h.finish_current().await;

    assert_eq!(h.transport.titles(), vec!["A", "B", "A", "B"]);
}

async fn vote(h: &Harness, voter: u64) -> SkipOutcome {
    h.controller
        .skip(guild(), user(voter), false, 5)
        .await
        .expect("skip")
}

#[tokio::test]
async fn vote_threshold_follows_population() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.enqueue("A").await;
    h.enqueue("B").await;

    assert_eq!(
        vote(&h, 2).await,
        SkipOutcome::Vote(VoteOutcome::Registered { votes: 1, required: 3 })
    );
    assert_eq!(
        vote(&h, 2).await,
        SkipOutcome::Vote(VoteOutcome::AlreadyVoted { votes: 1, required: 3 })
    );
    assert_eq!(
        vote(&h, 3).await,
        SkipOutcome::Vote(VoteOutcome::Registered { votes: 2, required: 3 })
    );
    assert_eq!(h.current_title().as_deref(), Some("A"));

    match vote(&h, 4).await {
        SkipOutcome::Skipped { track, by_vote } => {
            assert_eq!(track.title, "A");
            assert!(by_vote);
        }
        other => panic!("se esperaba salto, llegó {:?}", other),
    }
    assert_eq!(h.current_title().as_deref(), Some("B"));
    assert_eq!(h.controller.snapshot(guild()).unwrap().votes, 0);
}

#[tokio::test]
async fn privileged_skip_bypasses_vote() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.enqueue("A").await;

    let outcome = h.controller.skip(guild(), user(9), true, 10).await.unwrap();
    assert!(matches!(outcome, SkipOutcome::Skipped { by_vote: false, .. }));
    assert_eq!(h.current_title(), None);
}

#[tokio::test]
async fn unreliable_provider_falls_back_in_order() {
    let mut h = Harness::new(EngineSettings::default());
    h.transport.fail_provider(Provider::YouTube);
    h.transport.fail_provider(Provider::SoundCloud);
    h.connect().await;

    h.enqueue("A").await;
    h.enqueue("B").await;
    h.enqueue("C").await;

    let plays = h.transport.plays();
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0].provider, Provider::Invidious);

    let snapshot = h.controller.snapshot(guild()).unwrap();
    assert_eq!(snapshot.current.unwrap().provider, Provider::Invidious);
    let queued: Vec<_> = snapshot.upcoming.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(queued, vec!["B", "C"]);
    assert!(snapshot.upcoming.iter().all(|t| t.provider == Provider::YouTube));

    assert!(!h
        .drain_notices()
        .iter()
        .any(|n| matches!(n, PlaybackNotice::TrackFailed { .. })));
}

#[tokio::test]
async fn fallback_copy_stays_out_of_history() {
    let h = Harness::new(EngineSettings::default());
    h.transport.fail_provider(Provider::YouTube);
    h.transport.fail_provider(Provider::SoundCloud);
    h.connect().await;
    h.controller.set_loop_mode(guild(), LoopMode::Queue).unwrap();
    h.enqueue("A").await;
    h.enqueue("B").await;

    h.finish_current().await;
    let history = h.controller.snapshot(guild()).unwrap().history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].provider, Provider::YouTube);
    assert_eq!(history[0].source_uri, history[0].origin_uri);

    // La recarga vuelve a pasar por la cadena de alternativas
    let soundcloud = h.sources[1].clone();
    let before = soundcloud.searches();
    h.finish_current().await;
    assert_eq!(soundcloud.searches(), before + 1);

    let snapshot = h.controller.snapshot(guild()).unwrap();
    let current = snapshot.current.unwrap();
    assert_eq!((current.title.as_str(), current.provider), ("A", Provider::Invidious));
    assert!(snapshot.upcoming.iter().all(|t| t.provider == Provider::YouTube));
    assert_eq!(h.transport.titles(), vec!["A", "B", "A"]);
}

#[tokio::test]
async fn duplicate_check_sees_through_fallback() {
    let h = Harness::new(EngineSettings {
        allow_duplicates: false,
        ..EngineSettings::default()
    });
    h.transport.fail_provider(Provider::YouTube);
    h.connect().await;
    h.enqueue("A").await;
    assert_eq!(h.transport.plays()[0].provider, Provider::SoundCloud);

    assert!(matches!(
        h.controller.enqueue(guild(), "A", user(2)).await,
        Err(ControllerError::Duplicate(_))
    ));
}

#[tokio::test]
async fn exhausted_fallback_reports_once_and_moves_on() {
    let mut h = Harness::new(EngineSettings {
        unreliable_providers: vec![],
        ..EngineSettings::default()
    });
    h.connect().await;
    h.enqueue("A").await;
    h.enqueue("B").await;
    h.drain_notices();

    h.transport.fail_provider(Provider::YouTube);
    h.finish_current().await;

    let failures: Vec<_> = h
        .drain_notices()
        .into_iter()
        .filter(|n| matches!(n, PlaybackNotice::TrackFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(h.current_title(), None);
    assert_eq!(h.controller.snapshot(guild()).unwrap().queue_len, 0);
}

#[tokio::test]
async fn stale_track_end_is_ignored() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.enqueue("A").await;
    h.enqueue("B").await;
    h.enqueue("C").await;

    let stale = h.transport.active(guild()).unwrap();
    h.controller.skip(guild(), user(1), false, 1).await.unwrap();
    assert_eq!(h.current_title().as_deref(), Some("B"));

    h.controller.on_track_end(guild(), stale, None).await;

    assert_eq!(h.current_title().as_deref(), Some("B"));
    assert_eq!(h.transport.titles(), vec!["A", "B"]);
    assert_eq!(h.transport.overlaps(), 0);
}

#[tokio::test]
async fn duplicates_and_limits_are_rejected() {
    let h = Harness::new(EngineSettings {
        allow_duplicates: false,
        max_queue_size: 2,
        ..EngineSettings::default()
    });
    h.connect().await;
    h.enqueue("A").await;

    assert!(matches!(
        h.controller.enqueue(guild(), "A", user(2)).await,
        Err(ControllerError::Duplicate(_))
    ));

    h.enqueue("B").await;
    h.enqueue("C").await;
    assert!(matches!(
        h.controller.enqueue(guild(), "D", user(2)).await,
        Err(ControllerError::QueueFull(2))
    ));
}

#[tokio::test]
async fn remove_and_shuffle_keep_positions_dense() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    for query in ["A", "B", "C", "D"] {
        h.enqueue(query).await;
    }

    let removed = h.controller.remove(guild(), 2).await.unwrap();
    assert_eq!(removed.title, "C");

    let snapshot = h.controller.snapshot(guild()).unwrap();
    let queued: Vec<_> = snapshot.upcoming.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(queued, vec!["B", "D"]);

    assert_eq!(h.controller.shuffle(guild()).await.unwrap(), 2);
    assert_eq!(h.controller.snapshot(guild()).unwrap().queue_len, 2);
}

#[tokio::test]
async fn pause_resume_follow_phase() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.enqueue("A").await;

    h.controller.pause(guild()).await.unwrap();
    assert_eq!(h.controller.snapshot(guild()).unwrap().phase, PlaybackPhase::Paused);
    assert!(matches!(
        h.controller.pause(guild()).await,
        Err(ControllerError::NotApplicable(_))
    ));

    h.controller.resume(guild()).await.unwrap();
    assert_eq!(h.controller.snapshot(guild()).unwrap().phase, PlaybackPhase::Playing);
}

#[tokio::test]
async fn clear_empties_queue_but_keeps_current() {
    let h = Harness::new(EngineSettings::default());
    h.connect().await;
    h.enqueue("A").await;
    h.enqueue("B").await;
    h.enqueue("C").await;

    assert_eq!(h.controller.clear_queue(guild()).await.unwrap(), 2);
    assert_eq!(h.current_title().as_deref(), Some("A"));

    h.finish_current().await;
    assert_eq!(h.current_title(), None);
    assert_eq!(h.transport.titles(), vec!["A"]);
}
