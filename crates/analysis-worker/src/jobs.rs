//! Job control: starts sync and analysis jobs in the background, answers
//! status queries and streams, and serves the training endpoints.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analyzer::{self, AnalysisSettings};
use crate::engine::{EngineAdapter, EngineLauncher};
use crate::error::WorkerError;
use crate::progress::{self, JobReporter, JobSnapshot, ProgressRegistry, StreamEvent, WatchOptions};
use crate::store::{AnalysisStatus, Difficulty, Store, TrainingSession};
use crate::sync::{self, ArchiveSource, SyncOptions};
use crate::training::{self, TrainingSettings, Verdict};

#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    pub analysis: AnalysisSettings,
    pub training: TrainingSettings,
    pub watch: WatchOptions,
    /// Absolute lifetime of one job
    pub job_timeout: Duration,
}

#[derive(Debug, Clone)]
enum Work {
    SyncAndAnalyze { player: String, options: SyncOptions },
    Pending { player: String },
    Single { game_id: i64, force: bool },
}

pub struct JobController<S, L, A> {
    store: Arc<S>,
    launcher: Arc<L>,
    archive: Arc<A>,
    registry: Arc<ProgressRegistry>,
    settings: JobSettings,
}

impl<S, L, A> Clone for JobController<S, L, A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            launcher: self.launcher.clone(),
            archive: self.archive.clone(),
            registry: self.registry.clone(),
            settings: self.settings,
        }
    }
}

impl<S: Store, L: EngineLauncher, A: ArchiveSource> JobController<S, L, A> {
    pub fn new(
        store: Arc<S>,
        launcher: Arc<L>,
        archive: Arc<A>,
        registry: Arc<ProgressRegistry>,
        settings: JobSettings,
    ) -> Self {
        Self {
            store,
            launcher,
            archive,
            registry,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProgressRegistry> {
        &self.registry
    }

    /// Sync the player's games, then analyse everything not yet analysed.
    /// Returns the job id at once; the work runs in the background.
    pub async fn start_sync_and_analyze(
        &self,
        player: &str,
        options: SyncOptions,
    ) -> Result<String, WorkerError> {
        let work = Work::SyncAndAnalyze {
            player: player.to_string(),
            options,
        };
        Ok(self.spawn(player, work).await)
    }

    /// Analyse the player's stored games that are not analysed yet, without syncing.
    pub async fn analyze_pending(&self, player: &str) -> Result<String, WorkerError> {
        let work = Work::Pending {
            player: player.to_string(),
        };
        Ok(self.spawn(player, work).await)
    }

    /// Analyse a single stored game. Already-analysed games are left alone
    /// unless `force` is set.
    pub async fn analyze_game(
        &self,
        player: &str,
        game_id: i64,
        force: bool,
    ) -> Result<String, WorkerError> {
        let game = self
            .store
            .get_game(game_id)
            .await?
            .filter(|g| g.info.player.eq_ignore_ascii_case(player))
            .ok_or(WorkerError::GameNotFound(game_id))?;
        if game.status == AnalysisStatus::Analyzing {
            return Err(WorkerError::AnalysisInProgress(game_id));
        }
        Ok(self.spawn(player, Work::Single { game_id, force }).await)
    }

    pub async fn get_job_status(
        &self,
        player: &str,
        job_id: &str,
    ) -> Result<Arc<JobSnapshot>, WorkerError> {
        self.registry
            .get(player, job_id)
            .await
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))
    }

    pub fn stream_job_events(
        &self,
        player: &str,
        job_id: &str,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        progress::watch(self.registry.clone(), player, job_id, self.settings.watch)
    }

    /// Jobs of the player still running, oldest first.
    pub async fn active_jobs(&self, player: &str) -> Vec<Arc<JobSnapshot>> {
        self.registry.active_for_player(player).await
    }

    pub async fn start_training_session(
        &self,
        player: &str,
        difficulty: Option<Difficulty>,
    ) -> Result<TrainingSession, WorkerError> {
        training::start_session(&*self.store, player, difficulty).await
    }

    pub async fn next_training_position(
        &self,
        player: &str,
        after_id: i64,
    ) -> Result<Option<i64>, WorkerError> {
        training::next_position(&*self.store, player, after_id).await
    }

    /// Grade a move on a stored position. The move is checked for legality
    /// before an engine is started.
    pub async fn submit_training_attempt(
        &self,
        position_id: i64,
        session_id: Option<i64>,
        attempted: &str,
        time_spent_secs: i32,
    ) -> Result<Verdict, WorkerError> {
        let position = self
            .store
            .training_position(position_id)
            .await?
            .ok_or(WorkerError::PositionNotFound(position_id))?;
        training::parse_attempt(&position.position.fen, attempted)?;
        if let Some(session_id) = session_id {
            self.store
                .get_session(session_id)
                .await?
                .ok_or(WorkerError::SessionNotFound(session_id))?;
        }

        let mut adapter = EngineAdapter::new(self.launcher.launch().await?);
        let result = training::submit_attempt(
            &*self.store,
            &mut adapter,
            &self.settings.training,
            position_id,
            session_id,
            attempted,
            time_spent_secs,
        )
        .await;
        adapter.quit().await;
        result
    }

    async fn spawn(&self, player: &str, work: Work) -> String {
        let job_id = Uuid::new_v4().to_string();
        // Registered before returning so the first status query finds it
        let reporter = JobReporter::start(self.registry.clone(), player, &job_id).await;
        info!(player = %player, job_id = %job_id, work = ?work, "Job started");

        let this = self.clone();
        tokio::spawn(async move { this.run(reporter, work).await });
        job_id
    }

    async fn run(self, mut reporter: JobReporter, work: Work) {
        let limit = self.settings.job_timeout;
        let result = tokio::time::timeout(limit, self.execute(&mut reporter, &work)).await;

        match result {
            Ok(Ok(message)) => reporter.finish(message).await,
            Ok(Err(e @ WorkerError::EngineUnavailable(_))) => {
                reporter.fail(format!("Analysis unavailable: {e}")).await
            }
            Ok(Err(e)) => reporter.fail(e.to_string()).await,
            Err(_) => {
                self.release_interrupted(&mut reporter).await;
                reporter
                    .fail(format!("Job timed out after {}s", limit.as_secs()))
                    .await
            }
        }
    }

    /// After a timeout the running analysis was dropped mid-game; hand the
    /// game it still held back so a later job can pick it up.
    async fn release_interrupted(&self, reporter: &mut JobReporter) {
        let Some(game_id) = reporter.claimed_game() else {
            return;
        };
        match self.store.release_game(game_id).await {
            Ok(()) => info!(game_id, "Released game held by timed out job"),
            Err(e) => warn!(game_id, error = %e, "Could not release timed out game"),
        }
        reporter.settle_claim();
    }

    async fn execute(
        &self,
        reporter: &mut JobReporter,
        work: &Work,
    ) -> Result<String, WorkerError> {
        let mut notes = Vec::new();
        let (game_ids, force) = match work {
            Work::SyncAndAnalyze { player, options } => {
                let report =
                    sync::sync_player(&*self.store, &*self.archive, player, options, reporter)
                        .await?;
                if let Some(reason) = report.interrupted {
                    notes.push(format!("sync interrupted: {reason}"));
                }
                notes.push(format!("{} new games", report.new_games.len()));
                (self.store.pending_games(player).await?, false)
            }
            Work::Pending { player } => (self.store.pending_games(player).await?, false),
            Work::Single { game_id, force } => (vec![*game_id], *force),
        };

        if game_ids.is_empty() {
            notes.push("nothing to analyze".to_string());
            return Ok(notes.join(", "));
        }

        let engine = self.launcher.launch().await?;
        let mut adapter = EngineAdapter::new(engine);
        let result = analyzer::analyze_batch(
            &*self.store,
            &mut adapter,
            &self.settings.analysis,
            &game_ids,
            force,
            reporter,
        )
        .await;
        adapter.quit().await;
        let report = result?;

        notes.push(format!(
            "{} games analyzed, {} errors found, {} training positions",
            report.analyzed, report.errors, report.training_positions
        ));
        if report.skipped > 0 {
            notes.push(format!("{} skipped", report.skipped));
        }
        if report.unparsable + report.failed > 0 {
            notes.push(format!("{} could not be analyzed", report.unparsable + report.failed));
        }
        Ok(notes.join(", "))
    }
}
