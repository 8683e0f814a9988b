//! Core game analysis logic: replay a stored game, evaluate every ply with
//! the engine, classify the played moves, persist the records and derive
//! training positions.

use std::time::Duration;

use chess_core::walker::{self, Ply};
use chess_core::PositionWalker;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::{self, GameSummary};
use crate::engine::{adaptive_depth, Engine, EngineAdapter};
use crate::error::WorkerError;
use crate::progress::{JobReporter, ProgressThrottle};
use crate::store::{AnalysisStatus, Claim, Game, MoveRecord, Punishment, Store};
use crate::training;

/// Losses from this many centipawns up get an explanatory punishment line.
pub const PUNISHMENT_MIN_LOSS: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisSettings {
    pub base_depth: u32,
    /// Time budget per position
    pub movetime: Duration,
    /// Candidate lines requested per position
    pub lines: u32,
}

impl AnalysisSettings {
    /// Reduced search used when the played move is outside the candidate list.
    fn isolated(&self, depth: u32) -> (u32, Duration) {
        (depth.saturating_sub(2).max(1), self.movetime / 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyAnalyzed,
    InProgress,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Analyzed {
        game_id: i64,
        summary: GameSummary,
        training_positions: usize,
    },
    /// Stored as analysed with zero moves so it is not retried
    Unparsable { game_id: i64, reason: String },
    /// No ply could be evaluated
    Failed { game_id: i64, summary: GameSummary },
    Skipped { game_id: i64, reason: SkipReason },
}

impl AnalysisOutcome {
    pub fn game_id(&self) -> i64 {
        match self {
            AnalysisOutcome::Analyzed { game_id, .. }
            | AnalysisOutcome::Unparsable { game_id, .. }
            | AnalysisOutcome::Failed { game_id, .. }
            | AnalysisOutcome::Skipped { game_id, .. } => *game_id,
        }
    }
}

/// Totals over a batch of games.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub analyzed: u32,
    pub unparsable: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Inaccuracies, mistakes and blunders over the whole batch
    pub errors: u32,
    pub training_positions: usize,
    pub outcomes: Vec<AnalysisOutcome>,
}

impl BatchReport {
    fn add(&mut self, outcome: AnalysisOutcome) {
        match &outcome {
            AnalysisOutcome::Analyzed {
                summary,
                training_positions,
                ..
            } => {
                self.analyzed += 1;
                self.errors += summary.errors;
                self.training_positions += training_positions;
            }
            AnalysisOutcome::Unparsable { .. } => self.unparsable += 1,
            AnalysisOutcome::Failed { .. } => self.failed += 1,
            AnalysisOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Analyze one stored game.
///
/// The game is claimed first, so two jobs never write records for the same
/// game. If the run stops on an error the claim is released and the game
/// goes back to `unanalyzed`; records written so far stay until the next
/// run clears them.
pub async fn analyze_game<S: Store, E: Engine>(
    store: &S,
    adapter: &mut EngineAdapter<E>,
    settings: &AnalysisSettings,
    game_id: i64,
    force: bool,
    reporter: &mut JobReporter,
) -> Result<AnalysisOutcome, WorkerError> {
    let game = match store.claim_game(game_id, force).await? {
        Claim::Claimed(game) => game,
        Claim::AlreadyAnalyzed => {
            debug!(game_id, "Already analyzed, skipping");
            return Ok(AnalysisOutcome::Skipped {
                game_id,
                reason: SkipReason::AlreadyAnalyzed,
            });
        }
        Claim::InProgress => {
            info!(game_id, "Analysis already running elsewhere, skipping");
            return Ok(AnalysisOutcome::Skipped {
                game_id,
                reason: SkipReason::InProgress,
            });
        }
    };

    reporter.hold_claim(game_id);

    let result = match run_claimed(store, adapter, settings, &game, reporter).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            warn!(game_id, error = %e, "Analysis aborted, releasing game");
            if let Err(release) = store.release_game(game_id).await {
                warn!(game_id, error = %release, "Could not release game");
            }
            Err(e)
        }
    };
    reporter.settle_claim();
    result
}

async fn run_claimed<S: Store, E: Engine>(
    store: &S,
    adapter: &mut EngineAdapter<E>,
    settings: &AnalysisSettings,
    game: &Game,
    reporter: &mut JobReporter,
) -> Result<AnalysisOutcome, WorkerError> {
    let game_id = game.id;
    info!(game_id, player = %game.info.player, "Starting analysis");

    let walker = match PositionWalker::from_pgn(&game.info.pgn) {
        Ok(walker) => walker,
        Err(e) => {
            warn!(game_id, error = %e, "Unparsable game");
            let reason = e.to_string();
            store.delete_move_records(game_id).await?;
            store.replace_training_positions(game_id, &[]).await?;
            let summary = GameSummary::with_note(format!("unparsable game: {reason}"));
            store
                .finish_analysis(game_id, AnalysisStatus::Analyzed, &summary)
                .await?;
            reporter.analysis_start(game_id, 0).await;
            reporter.game_complete(0).await;
            return Ok(AnalysisOutcome::Unparsable { game_id, reason });
        }
    };

    let cleared = store.delete_move_records(game_id).await?;
    if cleared > 0 {
        debug!(game_id, cleared, "Cleared previous move records");
    }

    let total = walker.len() as u32;
    let movetime_ms = settings.movetime.as_millis() as u64;
    let mut summary = GameSummary::new(total, settings.base_depth, movetime_ms);
    let mut throttle = ProgressThrottle::new(total);
    reporter.analysis_start(game_id, total).await;

    for ply in walker.plies() {
        match evaluate_ply(adapter, settings, game_id, &ply).await {
            Ok(record) => {
                store.insert_move_record(&record).await?;
                summary.record(record.quality, record.accuracy);
            }
            Err(e @ WorkerError::EngineUnavailable(_)) => return Err(e),
            Err(e) => {
                warn!(game_id, ply = ply.ply, error = %e, "Ply skipped");
                summary.skip();
            }
        }

        if throttle.should_emit(ply.ply) {
            reporter.analysis_progress(ply.ply, total, summary.errors).await;
        }
    }

    if summary.plies_analyzed == 0 {
        summary.note = Some("no position could be evaluated".to_string());
        store.replace_training_positions(game_id, &[]).await?;
        store
            .finish_analysis(game_id, AnalysisStatus::Failed, &summary)
            .await?;
        warn!(game_id, plies = total, "Analysis failed: no ply evaluated");
        reporter.game_complete(0).await;
        return Ok(AnalysisOutcome::Failed { game_id, summary });
    }

    let records = store.move_records(game_id).await?;
    let positions = training::generate_positions(game, &records);
    let ids = store.replace_training_positions(game_id, &positions).await?;
    store
        .finish_analysis(game_id, AnalysisStatus::Analyzed, &summary)
        .await?;

    info!(
        game_id,
        plies = total,
        skipped = summary.plies_skipped,
        errors = summary.errors,
        accuracy = summary.average_accuracy,
        training_positions = ids.len(),
        "Analysis complete"
    );
    reporter.game_complete(summary.errors).await;

    Ok(AnalysisOutcome::Analyzed {
        game_id,
        summary,
        training_positions: ids.len(),
    })
}

/// Evaluate and classify a single ply.
pub async fn evaluate_ply<E: Engine>(
    adapter: &mut EngineAdapter<E>,
    settings: &AnalysisSettings,
    game_id: i64,
    ply: &Ply,
) -> Result<MoveRecord, WorkerError> {
    let depth = adaptive_depth(settings.base_depth, ply.piece_count);
    let candidates = adapter
        .evaluate(&ply.fen_before, depth, settings.movetime, settings.lines)
        .await?;
    let best = candidates
        .first()
        .cloned()
        .ok_or_else(|| WorkerError::Engine(format!("no candidate at ply {}", ply.ply)))?;

    let (rank, played_eval) = match candidates.iter().find(|c| c.uci == ply.uci) {
        Some(c) => (Some(c.rank), c.eval),
        None => {
            let (iso_depth, iso_time) = settings.isolated(depth);
            let played = adapter
                .evaluate_move(&ply.fen_before, &ply.uci, iso_depth, iso_time)
                .await?;
            (None, played.eval)
        }
    };

    let (loss, quality) = analysis::classify(best.eval, played_eval, ply.side_to_move, rank);

    let punishment = if loss >= PUNISHMENT_MIN_LOSS && !walker::is_terminal(&ply.fen_after)? {
        punishment_line(adapter, settings, depth, &ply.fen_after).await?
    } else {
        None
    };

    Ok(MoveRecord {
        game_id,
        ply: ply.ply,
        move_number: ply.move_number,
        side: ply.side_to_move,
        san: ply.san.clone(),
        uci: ply.uci.clone(),
        fen_before: ply.fen_before.clone(),
        fen_after: ply.fen_after.clone(),
        eval_before: best.eval,
        eval_after: played_eval,
        centipawn_loss: loss,
        quality,
        accuracy: analysis::move_accuracy(loss),
        rank,
        best_move_uci: best.uci.clone(),
        best_move_san: best.san.clone(),
        best_line: best.line.clone(),
        candidates,
        punishment,
        depth,
        piece_count: ply.piece_count,
    })
}

/// The opponent's best reply after a losing move. Only an unavailable
/// engine is an error here; any other failure just leaves the line out.
async fn punishment_line<E: Engine>(
    adapter: &mut EngineAdapter<E>,
    settings: &AnalysisSettings,
    depth: u32,
    fen_after: &str,
) -> Result<Option<Punishment>, WorkerError> {
    match adapter.evaluate(fen_after, depth, settings.movetime, 1).await {
        Ok(candidates) => Ok(candidates.into_iter().next().map(|c| Punishment {
            san: c.san,
            uci: c.uci,
            eval: c.eval,
            line: c.line,
        })),
        Err(e @ WorkerError::EngineUnavailable(_)) => Err(e),
        Err(e) => {
            debug!(fen = fen_after, error = %e, "No punishment line");
            Ok(None)
        }
    }
}

/// Analyze a list of games in order, reporting batch-wide progress.
/// Stops at the first error that is not specific to one game.
pub async fn analyze_batch<S: Store, E: Engine>(
    store: &S,
    adapter: &mut EngineAdapter<E>,
    settings: &AnalysisSettings,
    game_ids: &[i64],
    force: bool,
    reporter: &mut JobReporter,
) -> Result<BatchReport, WorkerError> {
    let mut report = BatchReport::default();
    reporter.set_batch(game_ids.len() as u32);

    for &game_id in game_ids {
        let outcome = match analyze_game(store, adapter, settings, game_id, force, reporter).await {
            Ok(outcome) => outcome,
            Err(WorkerError::GameNotFound(_)) => AnalysisOutcome::Skipped {
                game_id,
                reason: SkipReason::NotFound,
            },
            Err(e) => return Err(e),
        };
        report.add(outcome);
    }

    Ok(report)
}
