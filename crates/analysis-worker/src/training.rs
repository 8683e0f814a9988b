//! Training positions: derived from the player's own mistakes, replayed
//! and graded against the engine.

use std::time::Duration;

use chess_core::{walker, Side};
use serde::Serialize;
use tracing::info;

use crate::analysis::Quality;
use crate::engine::{Candidate, Engine, EngineAdapter};
use crate::error::WorkerError;
use crate::store::{
    Difficulty, Game, MoveRecord, NewTrainingAttempt, NewTrainingPosition, Store,
    TrainingPosition, TrainingSession,
};

/// Candidate lines requested when grading an attempt.
pub const TRAINING_LINES: u32 = 5;
/// Positions handed out per session.
pub const SESSION_MAX_POSITIONS: usize = 50;
/// Upper bound when walking every position of a player.
const ALL_POSITIONS: usize = 10_000;

/// Pawns an attempt must gain over the original move to count as better.
const BETTER_MARGIN: f64 = 0.2;
/// Losing more than this many pawns against the original is a blunder.
const BLUNDER_DROP: f64 = -1.0;
/// Gain that makes an attempt good even outside the top lines.
const CLEAR_GAIN: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingSettings {
    pub depth: u32,
    pub movetime: Duration,
}

/// Difficulty of the training position made from a move of this quality.
pub fn difficulty_for(quality: Quality) -> Option<Difficulty> {
    match quality {
        Quality::Mistake => Some(Difficulty::Medium),
        Quality::Blunder => Some(Difficulty::Hard),
        _ => None,
    }
}

/// One position per mistake or blunder made by the tracked player. The
/// opponent's errors are left out.
pub fn generate_positions(game: &Game, records: &[MoveRecord]) -> Vec<NewTrainingPosition> {
    let Some(player_side) = game.player_side() else {
        return Vec::new();
    };

    records
        .iter()
        .filter(|r| r.side == player_side)
        .filter_map(|r| {
            let difficulty = difficulty_for(r.quality)?;
            Some(NewTrainingPosition {
                player: game.info.player.clone(),
                game_id: game.id,
                ply: r.ply,
                fen: r.fen_before.clone(),
                side_to_move: r.side,
                original_move: r.san.clone(),
                original_eval: r.eval_after,
                best_move_uci: r.best_move_uci.clone(),
                best_move_san: r.best_move_san.clone(),
                best_eval: r.eval_before,
                difficulty,
                alternatives: r.candidates.iter().take(TRAINING_LINES as usize).cloned().collect(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Perfect,
    Good,
    Suboptimal,
    Poor,
    Blunder,
}

impl VerdictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictKind::Perfect => "perfect",
            VerdictKind::Good => "good",
            VerdictKind::Suboptimal => "suboptimal",
            VerdictKind::Poor => "poor",
            VerdictKind::Blunder => "blunder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub position_id: i64,
    pub attempted_uci: String,
    pub attempted_san: String,
    pub verdict: VerdictKind,
    /// Centipawns from White's point of view
    pub attempted_eval: i32,
    pub original_eval: i32,
    pub best_eval: i32,
    /// Pawns gained over the original move, positive when it helps the mover
    pub improvement: f64,
    pub is_better: bool,
    pub is_best: bool,
    pub solved: bool,
    /// 1-based rank among the engine's lines, None when outside them
    pub rank: Option<u32>,
    pub top_moves: Vec<Candidate>,
    pub message: String,
    pub attempt_id: Option<i64>,
}

/// Read user input as a move in the stored position.
pub fn parse_attempt(fen: &str, attempted: &str) -> Result<(String, String), WorkerError> {
    if attempted.trim().is_empty() {
        return Err(WorkerError::IllegalMove("empty move".to_string()));
    }
    walker::resolve_move(fen, attempted)
        .ok_or_else(|| WorkerError::IllegalMove(format!("{} is not legal here", attempted.trim())))
}

/// Pawns gained by `attempted` over `original`, seen from `side`.
pub fn improvement(attempted_eval: i32, original_eval: i32, side: Side) -> f64 {
    let diff = (attempted_eval - original_eval) as f64 / 100.0;
    if side.is_white() {
        diff
    } else {
        -diff
    }
}

pub fn grade(is_best: bool, rank: Option<u32>, improvement: f64) -> VerdictKind {
    if is_best {
        VerdictKind::Perfect
    } else if improvement < BLUNDER_DROP {
        VerdictKind::Blunder
    } else if rank.is_some_and(|r| r <= 3) && improvement > 0.0 {
        VerdictKind::Good
    } else if rank.is_some_and(|r| r <= TRAINING_LINES) {
        VerdictKind::Suboptimal
    } else if improvement > CLEAR_GAIN {
        VerdictKind::Good
    } else if improvement > 0.0 {
        VerdictKind::Suboptimal
    } else {
        VerdictKind::Poor
    }
}

/// Grade an attempted move on a stored position. Illegal or unreadable
/// moves are rejected before the engine is asked anything.
pub async fn check_move<E: Engine>(
    adapter: &mut EngineAdapter<E>,
    settings: &TrainingSettings,
    position: &TrainingPosition,
    attempted: &str,
) -> Result<Verdict, WorkerError> {
    let p = &position.position;
    let (uci, san) = parse_attempt(&p.fen, attempted)?;

    let top = adapter
        .evaluate(&p.fen, settings.depth, settings.movetime, TRAINING_LINES)
        .await?;

    let ranked = top.iter().find(|c| c.uci == uci);
    let rank = ranked.map(|c| c.rank);
    let attempted_eval = match ranked {
        Some(c) => c.eval,
        None => {
            adapter
                .evaluate_move(&p.fen, &uci, settings.depth, settings.movetime)
                .await?
                .eval
        }
    };

    // Fresh score of the original move when it is among the lines, so both
    // sides of the comparison come from the same search
    let original_eval = top
        .iter()
        .find(|c| c.san == p.original_move)
        .map(|c| c.eval)
        .unwrap_or(p.original_eval);

    let engine_best = top.first().map(|c| c.uci.as_str());
    let is_best = engine_best == Some(uci.as_str()) || uci == p.best_move_uci;
    let gain = improvement(attempted_eval, original_eval, p.side_to_move);
    let verdict = grade(is_best, rank, gain);
    let is_better = gain > BETTER_MARGIN;

    let message = format!(
        "{san}: {:+.2}, {:+.2} against {}",
        attempted_eval as f64 / 100.0,
        gain,
        p.original_move
    );

    Ok(Verdict {
        position_id: position.id,
        attempted_uci: uci,
        attempted_san: san,
        verdict,
        attempted_eval,
        original_eval,
        best_eval: p.best_eval,
        improvement: (gain * 100.0).round() / 100.0,
        is_better,
        is_best,
        solved: verdict == VerdictKind::Perfect || is_better,
        rank,
        top_moves: top,
        message,
        attempt_id: None,
    })
}

/// Grade an attempt and log it, bumping the position (and session) counters.
pub async fn submit_attempt<S: Store, E: Engine>(
    store: &S,
    adapter: &mut EngineAdapter<E>,
    settings: &TrainingSettings,
    position_id: i64,
    session_id: Option<i64>,
    attempted: &str,
    time_spent_secs: i32,
) -> Result<Verdict, WorkerError> {
    let position = store
        .training_position(position_id)
        .await?
        .ok_or(WorkerError::PositionNotFound(position_id))?;

    let mut verdict = check_move(adapter, settings, &position, attempted).await?;

    let attempt = NewTrainingAttempt {
        position_id,
        session_id,
        attempted_move: verdict.attempted_uci.clone(),
        attempted_eval: verdict.attempted_eval,
        verdict: verdict.verdict.as_str().to_string(),
        improvement: verdict.improvement,
        is_better: verdict.is_better,
        is_best: verdict.is_best,
        time_spent_secs: time_spent_secs.max(0),
    };
    verdict.attempt_id = Some(store.record_attempt(&attempt, verdict.solved).await?);

    info!(
        position_id,
        verdict = verdict.verdict.as_str(),
        improvement = verdict.improvement,
        "Training attempt graded"
    );
    Ok(verdict)
}

/// Open a session over the player's least-practised positions.
pub async fn start_session<S: Store>(
    store: &S,
    player: &str,
    difficulty: Option<Difficulty>,
) -> Result<TrainingSession, WorkerError> {
    let positions = store
        .training_positions(player, difficulty, SESSION_MAX_POSITIONS)
        .await?;
    let ids: Vec<i64> = positions.iter().map(|p| p.id).collect();
    let session = store.create_session(player, difficulty, &ids).await?;
    info!(
        player = %player,
        session_id = session.id,
        positions = ids.len(),
        "Training session started"
    );
    Ok(session)
}

/// The player's next position by id after `after_id`, None past the last.
pub async fn next_position<S: Store>(
    store: &S,
    player: &str,
    after_id: i64,
) -> Result<Option<i64>, WorkerError> {
    let positions = store.training_positions(player, None, ALL_POSITIONS).await?;
    Ok(positions.iter().map(|p| p.id).filter(|id| *id > after_id).min())
}
