//! Persistence seam for games, move records, sync cursors and training data.
//!
//! The pipeline only depends on the [`Store`] trait. `PgStore` backs the
//! server and CLI; `MemoryStore` backs the test suite. Methods return
//! `impl Future + Send` so stores can be driven from spawned jobs.

pub mod memory;
pub mod postgres;

use std::future::Future;

use chess_core::{LineMove, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{GameSummary, Quality};
use crate::engine::Candidate;
use crate::error::WorkerError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Unanalyzed,
    /// Claimed by a running job
    Analyzing,
    Analyzed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Unanalyzed => "unanalyzed",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Analyzed => "analyzed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unanalyzed" => Ok(AnalysisStatus::Unanalyzed),
            "analyzing" => Ok(AnalysisStatus::Analyzing),
            "analyzed" => Ok(AnalysisStatus::Analyzed),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(format!("unknown analysis status: {other}")),
        }
    }
}

/// A game as absorbed from the archive, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGame {
    pub external_id: String,
    pub player: String,
    pub white: String,
    pub black: String,
    pub white_result: String,
    pub black_result: String,
    /// `white_win`, `black_win`, or the white result code for other endings
    pub result: String,
    pub time_control: String,
    pub rated: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub pgn: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: i64,
    #[serde(flatten)]
    pub info: NewGame,
    pub status: AnalysisStatus,
    pub summary: Option<GameSummary>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl Game {
    /// Colour the tracked player had in this game, if they played it.
    pub fn player_side(&self) -> Option<Side> {
        let player = self.info.player.to_lowercase();
        if self.info.white.to_lowercase() == player {
            Some(Side::White)
        } else if self.info.black.to_lowercase() == player {
            Some(Side::Black)
        } else {
            None
        }
    }
}

/// Per-player incremental sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub player: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_game_end_time: Option<DateTime<Utc>>,
    pub total_games: i64,
    pub sync_count: i64,
}

impl SyncCursor {
    pub fn new(player: &str) -> Self {
        Self {
            player: player.to_string(),
            last_sync_time: None,
            last_game_end_time: None,
            total_games: 0,
            sync_count: 0,
        }
    }
}

/// The opponent's best answer to a losing move, kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    pub san: String,
    pub uci: String,
    pub eval: i32,
    pub line: Vec<LineMove>,
}

/// Engine verdict for one ply. Evaluations are centipawns from White's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub game_id: i64,
    pub ply: u32,
    pub move_number: u32,
    pub side: Side,
    pub san: String,
    pub uci: String,
    pub fen_before: String,
    pub fen_after: String,
    pub eval_before: i32,
    pub eval_after: i32,
    pub centipawn_loss: i32,
    pub quality: Quality,
    pub accuracy: f64,
    /// 1-based rank among the engine's lines, None when outside them
    pub rank: Option<u32>,
    pub best_move_uci: String,
    pub best_move_san: String,
    pub best_line: Vec<LineMove>,
    pub candidates: Vec<Candidate>,
    pub punishment: Option<Punishment>,
    pub depth: u32,
    pub piece_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrainingPosition {
    pub player: String,
    pub game_id: i64,
    pub ply: u32,
    pub fen: String,
    pub side_to_move: Side,
    /// The move actually played, in SAN
    pub original_move: String,
    pub original_eval: i32,
    pub best_move_uci: String,
    pub best_move_san: String,
    pub best_eval: i32,
    pub difficulty: Difficulty,
    pub alternatives: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPosition {
    pub id: i64,
    #[serde(flatten)]
    pub position: NewTrainingPosition,
    pub times_presented: i64,
    pub times_solved: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrainingAttempt {
    pub position_id: i64,
    pub session_id: Option<i64>,
    pub attempted_move: String,
    pub attempted_eval: i32,
    pub verdict: String,
    /// Pawns gained over the original move, from the mover's side
    pub improvement: f64,
    pub is_better: bool,
    pub is_best: bool,
    pub time_spent_secs: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingAttempt {
    pub id: i64,
    #[serde(flatten)]
    pub attempt: NewTrainingAttempt,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: i64,
    pub player: String,
    pub difficulty: Option<Difficulty>,
    pub position_ids: Vec<i64>,
    pub positions_attempted: i64,
    pub positions_solved: i64,
    pub total_improvement: f64,
    pub started_at: DateTime<Utc>,
}

/// Result of trying to take a game for analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Claimed(Game),
    /// Already analysed and the request was not forced
    AlreadyAnalyzed,
    /// Another job holds the game
    InProgress,
}

pub trait Store: Send + Sync + 'static {
    /// Insert a game. Returns None when the external id is already stored.
    fn insert_game(
        &self,
        game: &NewGame,
    ) -> impl Future<Output = Result<Option<i64>, WorkerError>> + Send;

    fn get_game(&self, id: i64) -> impl Future<Output = Result<Option<Game>, WorkerError>> + Send;

    /// Games of a player, most recent first.
    fn list_games(&self, player: &str)
        -> impl Future<Output = Result<Vec<Game>, WorkerError>> + Send;

    fn count_games(&self, player: &str) -> impl Future<Output = Result<i64, WorkerError>> + Send;

    /// Ids of games not yet analysed and not claimed, oldest first.
    fn pending_games(&self, player: &str)
        -> impl Future<Output = Result<Vec<i64>, WorkerError>> + Send;

    /// Atomically move a game into `analyzing`. Unanalysed and failed games
    /// can always be claimed; analysed games only when `force` is set.
    fn claim_game(
        &self,
        id: i64,
        force: bool,
    ) -> impl Future<Output = Result<Claim, WorkerError>> + Send;

    /// Hand a claimed game back as `unanalyzed`.
    fn release_game(&self, id: i64) -> impl Future<Output = Result<(), WorkerError>> + Send;

    /// Hand back every claimed game. Only safe while no job is running,
    /// i.e. at startup after an unclean exit. Returns how many were reset.
    fn release_stale_claims(&self) -> impl Future<Output = Result<u64, WorkerError>> + Send;

    /// Store the final status and summary of a claimed game.
    fn finish_analysis(
        &self,
        id: i64,
        status: AnalysisStatus,
        summary: &GameSummary,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;

    fn get_cursor(
        &self,
        player: &str,
    ) -> impl Future<Output = Result<Option<SyncCursor>, WorkerError>> + Send;

    fn save_cursor(&self, cursor: &SyncCursor)
        -> impl Future<Output = Result<(), WorkerError>> + Send;

    fn delete_move_records(&self, game_id: i64)
        -> impl Future<Output = Result<u64, WorkerError>> + Send;

    fn insert_move_record(
        &self,
        record: &MoveRecord,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;

    /// Move records of a game in ply order.
    fn move_records(
        &self,
        game_id: i64,
    ) -> impl Future<Output = Result<Vec<MoveRecord>, WorkerError>> + Send;

    /// Drop every training position derived from the game and store the new set.
    fn replace_training_positions(
        &self,
        game_id: i64,
        positions: &[NewTrainingPosition],
    ) -> impl Future<Output = Result<Vec<i64>, WorkerError>> + Send;

    fn training_position(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<TrainingPosition>, WorkerError>> + Send;

    /// Least-presented positions first, then by id.
    fn training_positions(
        &self,
        player: &str,
        difficulty: Option<Difficulty>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<TrainingPosition>, WorkerError>> + Send;

    /// Log an attempt and bump the position counters (and session stats,
    /// when the attempt belongs to a session) in one step.
    fn record_attempt(
        &self,
        attempt: &NewTrainingAttempt,
        solved: bool,
    ) -> impl Future<Output = Result<i64, WorkerError>> + Send;

    fn attempts(
        &self,
        position_id: i64,
    ) -> impl Future<Output = Result<Vec<TrainingAttempt>, WorkerError>> + Send;

    fn create_session(
        &self,
        player: &str,
        difficulty: Option<Difficulty>,
        position_ids: &[i64],
    ) -> impl Future<Output = Result<TrainingSession, WorkerError>> + Send;

    fn get_session(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<TrainingSession>, WorkerError>> + Send;
}
