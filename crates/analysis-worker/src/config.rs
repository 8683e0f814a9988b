//! Worker configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::analyzer::AnalysisSettings;
use crate::error::WorkerError;
use crate::jobs::JobSettings;
use crate::progress::WatchOptions;
use crate::stockfish::EngineOptions;
use crate::training::TrainingSettings;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Database connection URL
    pub database_url: String,

    /// Path to Stockfish binary
    pub stockfish_path: String,

    pub engine_threads: u32,
    pub engine_hash_mb: u32,

    /// Base search depth before the piece-count adjustment
    pub analysis_depth: u32,

    /// Time budget per position, in milliseconds
    pub analysis_movetime_ms: u64,

    /// Number of candidate lines requested per position
    pub analysis_lines: u32,

    /// Search depth used when grading training attempts
    pub training_depth: u32,

    /// Absolute timeout for one job, in seconds
    pub job_timeout_secs: u64,

    pub progress_poll_ms: u64,

    /// How long a finished job stays visible to pollers
    pub progress_retention_secs: u64,

    pub stream_not_found_secs: u64,
    pub heartbeat_secs: u64,

    /// Root of the game archive API
    pub archive_base_url: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, WorkerError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| WorkerError::Config("DATABASE_URL not set"))?;

        let config = Self {
            database_url,
            stockfish_path: env::var("STOCKFISH_PATH")
                .unwrap_or_else(|_| "/usr/local/bin/stockfish".to_string()),
            engine_threads: env_or("ENGINE_THREADS", 1),
            engine_hash_mb: env_or("ENGINE_HASH_MB", 128),
            analysis_depth: env_or("ANALYSIS_DEPTH", 18),
            analysis_movetime_ms: env_or("ANALYSIS_MOVETIME_MS", 500),
            analysis_lines: env_or("ANALYSIS_LINES", 5),
            training_depth: env_or("TRAINING_DEPTH", 16),
            job_timeout_secs: env_or("JOB_TIMEOUT_SECS", 45 * 60),
            progress_poll_ms: env_or("PROGRESS_POLL_MS", 2000),
            progress_retention_secs: env_or("PROGRESS_RETENTION_SECS", 10),
            stream_not_found_secs: env_or("STREAM_NOT_FOUND_SECS", 30),
            heartbeat_secs: env_or("HEARTBEAT_SECS", 30),
            archive_base_url: env::var("ARCHIVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.chess.com/pub".to_string()),
        };

        if config.analysis_depth == 0 {
            return Err(WorkerError::Config("ANALYSIS_DEPTH must be positive"));
        }
        if config.analysis_lines == 0 {
            return Err(WorkerError::Config("ANALYSIS_LINES must be positive"));
        }

        Ok(config)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            path: self.stockfish_path.clone(),
            threads: self.engine_threads,
            hash_mb: self.engine_hash_mb,
        }
    }

    pub fn analysis_settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            base_depth: self.analysis_depth,
            movetime: Duration::from_millis(self.analysis_movetime_ms),
            lines: self.analysis_lines,
        }
    }

    pub fn training_settings(&self) -> TrainingSettings {
        TrainingSettings {
            depth: self.training_depth,
            movetime: Duration::from_millis(self.analysis_movetime_ms * 2),
        }
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            poll_interval: Duration::from_millis(self.progress_poll_ms),
            not_found_grace: Duration::from_secs(self.stream_not_found_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            timeout: self.job_timeout(),
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            analysis: self.analysis_settings(),
            training: self.training_settings(),
            watch: self.watch_options(),
            job_timeout: self.job_timeout(),
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn progress_retention(&self) -> Duration {
        Duration::from_secs(self.progress_retention_secs)
    }
}
