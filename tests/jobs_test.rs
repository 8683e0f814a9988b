//! Integration tests: background jobs, their progress and event streams.

mod common;

use std::sync::Arc;
use std::time::Duration;

use analysis_worker::progress::{JobSnapshot, JobState, Phase, StreamEvent};
use analysis_worker::store::{AnalysisStatus, MemoryStore, Store};
use analysis_worker::sync::SyncOptions;
use analysis_worker::WorkerError;
use common::*;
use futures::StreamExt;

const T0: i64 = 1_700_000_000;

async fn wait_terminal(controller: &TestController, job_id: &str) -> Arc<JobSnapshot> {
    for _ in 0..500 {
        let snapshot = controller.get_job_status(PLAYER, job_id).await.unwrap();
        if snapshot.state.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never finished");
}

struct Harness {
    store: Arc<MemoryStore>,
    launcher: Arc<FakeLauncher>,
    controller: TestController,
}

fn harness(launcher: FakeLauncher, archive: FakeArchive) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let launcher = Arc::new(launcher);
    let controller = controller(
        store.clone(),
        launcher.clone(),
        Arc::new(archive),
        job_settings(),
    );
    Harness {
        store,
        launcher,
        controller,
    }
}

#[tokio::test]
async fn test_sync_and_analyze_job_finishes() {
    let archive = FakeArchive::new();
    archive.add_month("2023/11", vec![archive_game(1, T0, 4), archive_game(2, T0 + 60, 6)]);
    let h = harness(FakeLauncher::new(Script::default().with_loss(2, 150)), archive);

    let job_id = h
        .controller
        .start_sync_and_analyze(PLAYER, SyncOptions::default())
        .await
        .unwrap();
    let done = wait_terminal(&h.controller, &job_id).await;

    assert_eq!(done.state, JobState::Finished);
    assert_eq!(done.phase, Phase::Finished);
    assert_eq!(done.progress, 100);
    assert_eq!(done.game_count, 2);
    assert_eq!(done.errors, 2);
    assert!(done.message.contains("2 new games"), "{}", done.message);
    assert!(done.message.contains("2 games analyzed"), "{}", done.message);
    assert_eq!(h.launcher.launches(), 1);

    for game in h.store.list_games(PLAYER).await.unwrap() {
        assert_eq!(game.status, AnalysisStatus::Analyzed);
    }
    assert_eq!(
        h.store.training_positions(PLAYER, None, 50).await.unwrap().len(),
        2
    );
    assert!(h.controller.active_jobs(PLAYER).await.is_empty());
}

#[tokio::test]
async fn test_nothing_to_analyze_skips_the_engine() {
    let h = harness(FakeLauncher::new(Script::default()), FakeArchive::new());

    let job_id = h
        .controller
        .start_sync_and_analyze(PLAYER, SyncOptions::default())
        .await
        .unwrap();
    let done = wait_terminal(&h.controller, &job_id).await;

    assert_eq!(done.state, JobState::Finished);
    assert!(done.message.contains("nothing to analyze"));
    assert_eq!(h.launcher.launches(), 0);
}

#[tokio::test]
async fn test_engine_lost_mid_job_reaches_error() {
    let h = harness(
        FakeLauncher::new(Script::default().dies_after(10)),
        FakeArchive::new(),
    );
    let id = store_shuffle_game(&h.store, "e1", 40).await;

    let job_id = h.controller.analyze_pending(PLAYER).await.unwrap();
    let done = wait_terminal(&h.controller, &job_id).await;

    assert_eq!(done.state, JobState::Error);
    assert!(done.message.starts_with("Analysis unavailable"), "{}", done.message);

    let game = h.store.get_game(id).await.unwrap().unwrap();
    assert_eq!(game.status, AnalysisStatus::Unanalyzed);
    assert_eq!(h.store.move_records(id).await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_missing_engine_fails_the_job() {
    let h = harness(FakeLauncher::missing(), FakeArchive::new());
    let id = store_shuffle_game(&h.store, "m1", 4).await;

    let job_id = h.controller.analyze_game(PLAYER, id, false).await.unwrap();
    let done = wait_terminal(&h.controller, &job_id).await;

    assert_eq!(done.state, JobState::Error);
    assert!(done.message.starts_with("Analysis unavailable"));
    let game = h.store.get_game(id).await.unwrap().unwrap();
    assert_eq!(game.status, AnalysisStatus::Unanalyzed);
}

#[tokio::test]
async fn test_timed_out_job_releases_its_game() {
    let store = Arc::new(MemoryStore::new());
    let mut settings = job_settings();
    settings.job_timeout = Duration::from_millis(300);
    let controller = controller(
        store.clone(),
        Arc::new(FakeLauncher::new(
            Script::default().slow(Duration::from_millis(20)),
        )),
        Arc::new(FakeArchive::new()),
        settings,
    );
    let id = store_shuffle_game(&store, "slow", 40).await;

    let job_id = controller.analyze_pending(PLAYER).await.unwrap();
    let done = wait_terminal(&controller, &job_id).await;

    assert_eq!(done.state, JobState::Error);
    assert!(done.message.contains("timed out"), "{}", done.message);
    let game = store.get_game(id).await.unwrap().unwrap();
    assert_eq!(game.status, AnalysisStatus::Unanalyzed);
}

#[tokio::test]
async fn test_game_under_analysis_cannot_be_started_again() {
    let h = harness(
        FakeLauncher::new(Script::default().slow(Duration::from_millis(20))),
        FakeArchive::new(),
    );
    let id = store_shuffle_game(&h.store, "busy", 20).await;

    let first = h.controller.analyze_game(PLAYER, id, false).await.unwrap();
    for _ in 0..200 {
        let game = h.store.get_game(id).await.unwrap().unwrap();
        if game.status == AnalysisStatus::Analyzing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(matches!(
        h.controller.analyze_game(PLAYER, id, true).await,
        Err(WorkerError::AnalysisInProgress(g)) if g == id
    ));

    let done = wait_terminal(&h.controller, &first).await;
    assert_eq!(done.state, JobState::Finished);
    assert_eq!(h.store.move_records(id).await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_single_game_job_checks_ownership() {
    let h = harness(FakeLauncher::new(Script::default()), FakeArchive::new());
    let id = store_shuffle_game(&h.store, "o1", 4).await;

    assert!(matches!(
        h.controller.analyze_game(PLAYER, 999, false).await,
        Err(WorkerError::GameNotFound(999))
    ));
    assert!(matches!(
        h.controller.analyze_game("carol", id, false).await,
        Err(WorkerError::GameNotFound(_))
    ));

    let first = h.controller.analyze_game(PLAYER, id, false).await.unwrap();
    wait_terminal(&h.controller, &first).await;
    let analyzed = h.store.get_game(id).await.unwrap().unwrap();
    assert_eq!(analyzed.status, AnalysisStatus::Analyzed);

    // Not forced: the finished game is left alone
    let again = h.controller.analyze_game(PLAYER, id, false).await.unwrap();
    let done = wait_terminal(&h.controller, &again).await;
    assert!(done.message.contains("1 skipped"), "{}", done.message);

    let forced = h.controller.analyze_game(PLAYER, id, true).await.unwrap();
    let done = wait_terminal(&h.controller, &forced).await;
    assert!(done.message.contains("1 games analyzed"), "{}", done.message);
}

#[tokio::test]
async fn test_status_is_scoped_to_the_player() {
    let h = harness(FakeLauncher::new(Script::default()), FakeArchive::new());
    let job_id = h.controller.analyze_pending(PLAYER).await.unwrap();

    // Visible right after start, case-insensitively
    assert!(h.controller.get_job_status("BOB", &job_id).await.is_ok());
    assert!(matches!(
        h.controller.get_job_status("carol", &job_id).await,
        Err(WorkerError::JobNotFound(_))
    ));
    wait_terminal(&h.controller, &job_id).await;
}

#[tokio::test]
async fn test_event_stream_ends_with_terminal_state() {
    let archive = FakeArchive::new();
    archive.add_month("2023/11", vec![archive_game(1, T0, 8)]);
    let h = harness(FakeLauncher::new(Script::default()), archive);

    let job_id = h
        .controller
        .start_sync_and_analyze(PLAYER, SyncOptions::default())
        .await
        .unwrap();
    let events: Vec<StreamEvent> = h
        .controller
        .stream_job_events(PLAYER, &job_id)
        .collect()
        .await;

    assert!(matches!(events.first(), Some(StreamEvent::Reconnected { .. })));
    match events.last() {
        Some(StreamEvent::Progress { job }) | Some(StreamEvent::Reconnected { job }) => {
            assert_eq!(job.state, JobState::Finished);
            assert_eq!(job.job_id, job_id);
        }
        other => panic!("unexpected last event {other:?}"),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let seqs: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Reconnected { job } | StreamEvent::Progress { job } => Some(job.seq),
            _ => None,
        })
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
}

#[tokio::test]
async fn test_event_stream_for_unknown_job() {
    let h = harness(FakeLauncher::new(Script::default()), FakeArchive::new());

    let events: Vec<StreamEvent> = h
        .controller
        .stream_job_events(PLAYER, "no-such-job")
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name(), "session_not_found");
}

#[tokio::test]
async fn test_training_attempt_checks_run_before_engine_launch() {
    let h = harness(FakeLauncher::new(Script::default().with_loss(2, 300)), FakeArchive::new());
    let id = store_shuffle_game(&h.store, "p1", 4).await;
    let job_id = h.controller.analyze_game(PLAYER, id, false).await.unwrap();
    wait_terminal(&h.controller, &job_id).await;
    let launches = h.launcher.launches();

    let position = h.store.training_positions(PLAYER, None, 50).await.unwrap()[0].clone();

    assert!(matches!(
        h.controller.submit_training_attempt(12345, None, "e4", 1).await,
        Err(WorkerError::PositionNotFound(12345))
    ));
    assert!(matches!(
        h.controller.submit_training_attempt(position.id, None, "Ke2", 1).await,
        Err(WorkerError::IllegalMove(_))
    ));
    assert!(matches!(
        h.controller
            .submit_training_attempt(position.id, Some(777), ALTERNATIVE_UCI[1], 1)
            .await,
        Err(WorkerError::SessionNotFound(777))
    ));
    assert_eq!(h.launcher.launches(), launches);

    let session = h.controller.start_training_session(PLAYER, None).await.unwrap();
    assert_eq!(session.position_ids, vec![position.id]);
    let verdict = h
        .controller
        .submit_training_attempt(position.id, Some(session.id), ALTERNATIVE_UCI[1], 4)
        .await
        .unwrap();
    assert!(verdict.solved);
    assert_eq!(h.launcher.launches(), launches + 1);
    assert_eq!(
        h.controller.next_training_position(PLAYER, position.id).await.unwrap(),
        None
    );
}
