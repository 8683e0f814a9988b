//! Worker error types

use chess_core::WalkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The engine process is missing, exited, or stopped answering.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine answered but the answer was unusable for this position.
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Unparsable game: {0}")]
    UnparsableGame(#[from] WalkError),

    #[error("Illegal move: {0}")]
    IllegalMove(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Game not found: {0}")]
    GameNotFound(i64),

    #[error("Training position not found: {0}")]
    PositionNotFound(i64),

    #[error("Training session not found: {0}")]
    SessionNotFound(i64),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Analysis already running for game {0}")]
    AnalysisInProgress(i64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    /// Whether a later invocation of the same job may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::EngineUnavailable(_)
                | WorkerError::NetworkTimeout(_)
                | WorkerError::Archive(_)
                | WorkerError::Database(_)
                | WorkerError::AnalysisInProgress(_)
        )
    }
}
