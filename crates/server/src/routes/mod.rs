pub mod games;
pub mod health;
pub mod jobs;
pub mod training;

use analysis_worker::chess_com::ChessComClient;
use analysis_worker::jobs::JobController;
use analysis_worker::stockfish::StockfishLauncher;
use analysis_worker::store::{Difficulty, PgStore};
use regex::Regex;

use crate::error::AppError;

/// The job controller shared by every handler.
pub type Controller = JobController<PgStore, StockfishLauncher, ChessComClient>;

/// Reject names the archive API could never know, before any work starts.
pub fn validate_player(player: &str) -> Result<(), AppError> {
    let player_re = Regex::new(r"^[A-Za-z0-9_-]{2,40}$")
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !player_re.is_match(player) {
        return Err(AppError::BadRequest(format!("Invalid player name: {player}")));
    }
    Ok(())
}

pub fn parse_difficulty(raw: Option<&str>) -> Result<Option<Difficulty>, AppError> {
    raw.filter(|d| !d.is_empty() && *d != "all")
        .map(|d| d.parse::<Difficulty>().map_err(AppError::BadRequest))
        .transpose()
}
