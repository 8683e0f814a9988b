//! Postgres-backed store (runtime sqlx queries)

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use super::{
    AnalysisStatus, Claim, Difficulty, Game, MoveRecord, NewGame, NewTrainingAttempt,
    NewTrainingPosition, Punishment, Store, SyncCursor, TrainingAttempt, TrainingPosition,
    TrainingSession,
};
use crate::analysis::GameSummary;
use crate::engine::Candidate;
use crate::error::WorkerError;
use chess_core::LineMove;

const GAME_COLUMNS: &str = "id, external_id, player, white_player, black_player, white_result, \
     black_result, result, time_control, rated, start_time, end_time, pgn, url, \
     analysis_status, analysis_summary, analyzed_at";

const POSITION_COLUMNS: &str = "id, player, game_id, ply, fen, side_to_move, original_move, \
     original_eval, best_move_uci, best_move_san, best_eval, difficulty, alternatives, \
     times_presented, times_solved, created_at";

/// Tables used by the pipeline. Every statement is idempotent.
pub const SCHEMA_SQL: &str = r#"
-- Per-player incremental sync cursor
CREATE TABLE IF NOT EXISTS player_sync_status (
    player             TEXT PRIMARY KEY,
    last_sync_time     TIMESTAMPTZ,
    last_game_end_time TIMESTAMPTZ,
    total_games        BIGINT NOT NULL DEFAULT 0,
    sync_count         BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS games (
    id               BIGSERIAL PRIMARY KEY,
    external_id      TEXT UNIQUE NOT NULL,
    player           TEXT NOT NULL,
    white_player     TEXT NOT NULL,
    black_player     TEXT NOT NULL,
    white_result     TEXT NOT NULL DEFAULT '',
    black_result     TEXT NOT NULL DEFAULT '',
    result           TEXT NOT NULL DEFAULT '',
    time_control     TEXT NOT NULL DEFAULT '',
    rated            BOOLEAN NOT NULL DEFAULT TRUE,
    start_time       TIMESTAMPTZ NOT NULL,
    end_time         TIMESTAMPTZ NOT NULL,
    pgn              TEXT NOT NULL DEFAULT '',
    url              TEXT NOT NULL DEFAULT '',
    analysis_status  TEXT NOT NULL DEFAULT 'unanalyzed',
    analysis_summary JSONB,
    analyzed_at      TIMESTAMPTZ,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_games_player_lower
    ON games (LOWER(player), end_time);
CREATE INDEX IF NOT EXISTS idx_games_status
    ON games (analysis_status);

-- One row per analysed ply
CREATE TABLE IF NOT EXISTS move_records (
    game_id        BIGINT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    ply            INTEGER NOT NULL,
    move_number    INTEGER NOT NULL,
    side           TEXT NOT NULL,
    san            TEXT NOT NULL,
    uci            TEXT NOT NULL,
    fen_before     TEXT NOT NULL,
    fen_after      TEXT NOT NULL,
    eval_before    INTEGER NOT NULL,
    eval_after     INTEGER NOT NULL,
    centipawn_loss INTEGER NOT NULL,
    quality        TEXT NOT NULL,
    accuracy       DOUBLE PRECISION NOT NULL,
    move_rank      INTEGER,
    best_move_uci  TEXT NOT NULL,
    best_move_san  TEXT NOT NULL,
    best_line      JSONB NOT NULL DEFAULT '[]',
    candidates     JSONB NOT NULL DEFAULT '[]',
    punishment     JSONB,
    depth          INTEGER NOT NULL,
    piece_count    INTEGER NOT NULL,
    PRIMARY KEY (game_id, ply)
);

CREATE TABLE IF NOT EXISTS training_positions (
    id              BIGSERIAL PRIMARY KEY,
    player          TEXT NOT NULL,
    game_id         BIGINT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    ply             INTEGER NOT NULL,
    fen             TEXT NOT NULL,
    side_to_move    TEXT NOT NULL,
    original_move   TEXT NOT NULL,
    original_eval   INTEGER NOT NULL,
    best_move_uci   TEXT NOT NULL,
    best_move_san   TEXT NOT NULL,
    best_eval       INTEGER NOT NULL,
    difficulty      TEXT NOT NULL,
    alternatives    JSONB NOT NULL DEFAULT '[]',
    times_presented BIGINT NOT NULL DEFAULT 0,
    times_solved    BIGINT NOT NULL DEFAULT 0,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (player, game_id, ply)
);

CREATE INDEX IF NOT EXISTS idx_training_positions_player
    ON training_positions (LOWER(player), times_presented, id);

CREATE TABLE IF NOT EXISTS training_sessions (
    id                  BIGSERIAL PRIMARY KEY,
    player              TEXT NOT NULL,
    difficulty          TEXT,
    position_ids        BIGINT[] NOT NULL DEFAULT '{}',
    positions_attempted BIGINT NOT NULL DEFAULT 0,
    positions_solved    BIGINT NOT NULL DEFAULT 0,
    total_improvement   DOUBLE PRECISION NOT NULL DEFAULT 0,
    started_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Append-only attempt log
CREATE TABLE IF NOT EXISTS training_attempts (
    id              BIGSERIAL PRIMARY KEY,
    position_id     BIGINT NOT NULL REFERENCES training_positions(id) ON DELETE CASCADE,
    session_id      BIGINT REFERENCES training_sessions(id) ON DELETE SET NULL,
    attempted_move  TEXT NOT NULL,
    attempted_eval  INTEGER NOT NULL,
    verdict         TEXT NOT NULL,
    improvement     DOUBLE PRECISION NOT NULL,
    is_better       BOOLEAN NOT NULL,
    is_best         BOOLEAN NOT NULL,
    time_spent_secs INTEGER NOT NULL DEFAULT 0,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Apply [`SCHEMA_SQL`].
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_enum<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, WorkerError> {
    value
        .parse()
        .map_err(|e: String| WorkerError::Database(sqlx::Error::Decode(e.into())))
}

#[derive(FromRow)]
struct GameRow {
    id: i64,
    external_id: String,
    player: String,
    white_player: String,
    black_player: String,
    white_result: String,
    black_result: String,
    result: String,
    time_control: String,
    rated: bool,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    pgn: String,
    url: String,
    analysis_status: String,
    analysis_summary: Option<Json<GameSummary>>,
    analyzed_at: Option<DateTime<Utc>>,
}

impl TryFrom<GameRow> for Game {
    type Error = WorkerError;

    fn try_from(row: GameRow) -> Result<Self, Self::Error> {
        Ok(Game {
            id: row.id,
            info: NewGame {
                external_id: row.external_id,
                player: row.player,
                white: row.white_player,
                black: row.black_player,
                white_result: row.white_result,
                black_result: row.black_result,
                result: row.result,
                time_control: row.time_control,
                rated: row.rated,
                start_time: row.start_time,
                end_time: row.end_time,
                pgn: row.pgn,
                url: row.url,
            },
            status: parse_enum(&row.analysis_status)?,
            summary: row.analysis_summary.map(|s| s.0),
            analyzed_at: row.analyzed_at,
        })
    }
}

#[derive(FromRow)]
struct MoveRow {
    game_id: i64,
    ply: i32,
    move_number: i32,
    side: String,
    san: String,
    uci: String,
    fen_before: String,
    fen_after: String,
    eval_before: i32,
    eval_after: i32,
    centipawn_loss: i32,
    quality: String,
    accuracy: f64,
    move_rank: Option<i32>,
    best_move_uci: String,
    best_move_san: String,
    best_line: Json<Vec<LineMove>>,
    candidates: Json<Vec<Candidate>>,
    punishment: Option<Json<Punishment>>,
    depth: i32,
    piece_count: i32,
}

impl TryFrom<MoveRow> for MoveRecord {
    type Error = WorkerError;

    fn try_from(row: MoveRow) -> Result<Self, Self::Error> {
        Ok(MoveRecord {
            game_id: row.game_id,
            ply: row.ply as u32,
            move_number: row.move_number as u32,
            side: parse_enum(&row.side)?,
            san: row.san,
            uci: row.uci,
            fen_before: row.fen_before,
            fen_after: row.fen_after,
            eval_before: row.eval_before,
            eval_after: row.eval_after,
            centipawn_loss: row.centipawn_loss,
            quality: parse_enum(&row.quality)?,
            accuracy: row.accuracy,
            rank: row.move_rank.map(|r| r as u32),
            best_move_uci: row.best_move_uci,
            best_move_san: row.best_move_san,
            best_line: row.best_line.0,
            candidates: row.candidates.0,
            punishment: row.punishment.map(|p| p.0),
            depth: row.depth as u32,
            piece_count: row.piece_count as u32,
        })
    }
}

#[derive(FromRow)]
struct PositionRow {
    id: i64,
    player: String,
    game_id: i64,
    ply: i32,
    fen: String,
    side_to_move: String,
    original_move: String,
    original_eval: i32,
    best_move_uci: String,
    best_move_san: String,
    best_eval: i32,
    difficulty: String,
    alternatives: Json<Vec<Candidate>>,
    times_presented: i64,
    times_solved: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<PositionRow> for TrainingPosition {
    type Error = WorkerError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        Ok(TrainingPosition {
            id: row.id,
            position: NewTrainingPosition {
                player: row.player,
                game_id: row.game_id,
                ply: row.ply as u32,
                fen: row.fen,
                side_to_move: parse_enum(&row.side_to_move)?,
                original_move: row.original_move,
                original_eval: row.original_eval,
                best_move_uci: row.best_move_uci,
                best_move_san: row.best_move_san,
                best_eval: row.best_eval,
                difficulty: parse_enum(&row.difficulty)?,
                alternatives: row.alternatives.0,
            },
            times_presented: row.times_presented,
            times_solved: row.times_solved,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: i64,
    player: String,
    difficulty: Option<String>,
    position_ids: Vec<i64>,
    positions_attempted: i64,
    positions_solved: i64,
    total_improvement: f64,
    started_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for TrainingSession {
    type Error = WorkerError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(TrainingSession {
            id: row.id,
            player: row.player,
            difficulty: row.difficulty.as_deref().map(parse_enum).transpose()?,
            position_ids: row.position_ids,
            positions_attempted: row.positions_attempted,
            positions_solved: row.positions_solved,
            total_improvement: row.total_improvement,
            started_at: row.started_at,
        })
    }
}

impl Store for PgStore {
    async fn insert_game(&self, game: &NewGame) -> Result<Option<i64>, WorkerError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"INSERT INTO games (
                external_id, player, white_player, black_player, white_result,
                black_result, result, time_control, rated, start_time, end_time, pgn, url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id"#,
        )
        .bind(&game.external_id)
        .bind(&game.player)
        .bind(&game.white)
        .bind(&game.black)
        .bind(&game.white_result)
        .bind(&game.black_result)
        .bind(&game.result)
        .bind(&game.time_control)
        .bind(game.rated)
        .bind(game.start_time)
        .bind(game.end_time)
        .bind(&game.pgn)
        .bind(&game.url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn get_game(&self, id: i64) -> Result<Option<Game>, WorkerError> {
        let row: Option<GameRow> =
            sqlx::query_as(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Game::try_from).transpose()
    }

    async fn list_games(&self, player: &str) -> Result<Vec<Game>, WorkerError> {
        let rows: Vec<GameRow> = sqlx::query_as(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE LOWER(player) = LOWER($1) \
             ORDER BY end_time DESC, id DESC"
        ))
        .bind(player)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Game::try_from).collect()
    }

    async fn count_games(&self, player: &str) -> Result<i64, WorkerError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM games WHERE LOWER(player) = LOWER($1)")
                .bind(player)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    async fn pending_games(&self, player: &str) -> Result<Vec<i64>, WorkerError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"SELECT id FROM games
            WHERE LOWER(player) = LOWER($1)
              AND analysis_status IN ('unanalyzed', 'failed')
              AND pgn <> ''
            ORDER BY end_time ASC, id ASC"#,
        )
        .bind(player)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn claim_game(&self, id: i64, force: bool) -> Result<Claim, WorkerError> {
        let claimed: Option<(i64,)> = sqlx::query_as(
            r#"UPDATE games SET analysis_status = 'analyzing'
            WHERE id = $1
              AND (analysis_status IN ('unanalyzed', 'failed')
                   OR ($2 AND analysis_status = 'analyzed'))
            RETURNING id"#,
        )
        .bind(id)
        .bind(force)
        .fetch_optional(&self.pool)
        .await?;

        let game = self.get_game(id).await?.ok_or(WorkerError::GameNotFound(id))?;
        if claimed.is_some() {
            return Ok(Claim::Claimed(game));
        }
        Ok(match game.status {
            AnalysisStatus::Analyzed => Claim::AlreadyAnalyzed,
            _ => Claim::InProgress,
        })
    }

    async fn release_game(&self, id: i64) -> Result<(), WorkerError> {
        sqlx::query(
            "UPDATE games SET analysis_status = 'unanalyzed' \
             WHERE id = $1 AND analysis_status = 'analyzing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_stale_claims(&self) -> Result<u64, WorkerError> {
        let result = sqlx::query(
            "UPDATE games SET analysis_status = 'unanalyzed' WHERE analysis_status = 'analyzing'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn finish_analysis(
        &self,
        id: i64,
        status: AnalysisStatus,
        summary: &GameSummary,
    ) -> Result<(), WorkerError> {
        sqlx::query(
            r#"UPDATE games SET
                analysis_status = $2,
                analysis_summary = $3,
                analyzed_at = NOW()
            WHERE id = $1"#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(Json(summary))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cursor(&self, player: &str) -> Result<Option<SyncCursor>, WorkerError> {
        type CursorRow = (
            String,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            i64,
            i64,
        );
        let row: Option<CursorRow> = sqlx::query_as(
            r#"SELECT player, last_sync_time, last_game_end_time, total_games, sync_count
            FROM player_sync_status WHERE player = LOWER($1)"#,
        )
        .bind(player)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(player, last_sync_time, last_game_end_time, total_games, sync_count)| SyncCursor {
                player,
                last_sync_time,
                last_game_end_time,
                total_games,
                sync_count,
            },
        ))
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<(), WorkerError> {
        sqlx::query(
            r#"INSERT INTO player_sync_status (
                player, last_sync_time, last_game_end_time, total_games, sync_count
            ) VALUES (LOWER($1), $2, $3, $4, $5)
            ON CONFLICT (player) DO UPDATE SET
                last_sync_time = EXCLUDED.last_sync_time,
                last_game_end_time = EXCLUDED.last_game_end_time,
                total_games = EXCLUDED.total_games,
                sync_count = EXCLUDED.sync_count"#,
        )
        .bind(&cursor.player)
        .bind(cursor.last_sync_time)
        .bind(cursor.last_game_end_time)
        .bind(cursor.total_games)
        .bind(cursor.sync_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_move_records(&self, game_id: i64) -> Result<u64, WorkerError> {
        let result = sqlx::query("DELETE FROM move_records WHERE game_id = $1")
            .bind(game_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_move_record(&self, record: &MoveRecord) -> Result<(), WorkerError> {
        sqlx::query(
            r#"INSERT INTO move_records (
                game_id, ply, move_number, side, san, uci, fen_before, fen_after,
                eval_before, eval_after, centipawn_loss, quality, accuracy, move_rank,
                best_move_uci, best_move_san, best_line, candidates, punishment,
                depth, piece_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (game_id, ply) DO UPDATE SET
                eval_before = EXCLUDED.eval_before,
                eval_after = EXCLUDED.eval_after,
                centipawn_loss = EXCLUDED.centipawn_loss,
                quality = EXCLUDED.quality,
                accuracy = EXCLUDED.accuracy,
                move_rank = EXCLUDED.move_rank,
                best_move_uci = EXCLUDED.best_move_uci,
                best_move_san = EXCLUDED.best_move_san,
                best_line = EXCLUDED.best_line,
                candidates = EXCLUDED.candidates,
                punishment = EXCLUDED.punishment,
                depth = EXCLUDED.depth"#,
        )
        .bind(record.game_id)
        .bind(record.ply as i32)
        .bind(record.move_number as i32)
        .bind(record.side.as_str())
        .bind(&record.san)
        .bind(&record.uci)
        .bind(&record.fen_before)
        .bind(&record.fen_after)
        .bind(record.eval_before)
        .bind(record.eval_after)
        .bind(record.centipawn_loss)
        .bind(record.quality.as_str())
        .bind(record.accuracy)
        .bind(record.rank.map(|r| r as i32))
        .bind(&record.best_move_uci)
        .bind(&record.best_move_san)
        .bind(Json(&record.best_line))
        .bind(Json(&record.candidates))
        .bind(record.punishment.as_ref().map(Json))
        .bind(record.depth as i32)
        .bind(record.piece_count as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn move_records(&self, game_id: i64) -> Result<Vec<MoveRecord>, WorkerError> {
        let rows: Vec<MoveRow> = sqlx::query_as(
            r#"SELECT game_id, ply, move_number, side, san, uci, fen_before, fen_after,
                eval_before, eval_after, centipawn_loss, quality, accuracy, move_rank,
                best_move_uci, best_move_san, best_line, candidates, punishment,
                depth, piece_count
            FROM move_records WHERE game_id = $1 ORDER BY ply"#,
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MoveRecord::try_from).collect()
    }

    async fn replace_training_positions(
        &self,
        game_id: i64,
        positions: &[NewTrainingPosition],
    ) -> Result<Vec<i64>, WorkerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM training_positions WHERE game_id = $1")
            .bind(game_id)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(positions.len());
        for p in positions {
            let (id,): (i64,) = sqlx::query_as(
                r#"INSERT INTO training_positions (
                    player, game_id, ply, fen, side_to_move, original_move, original_eval,
                    best_move_uci, best_move_san, best_eval, difficulty, alternatives
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                RETURNING id"#,
            )
            .bind(&p.player)
            .bind(p.game_id)
            .bind(p.ply as i32)
            .bind(&p.fen)
            .bind(p.side_to_move.as_str())
            .bind(&p.original_move)
            .bind(p.original_eval)
            .bind(&p.best_move_uci)
            .bind(&p.best_move_san)
            .bind(p.best_eval)
            .bind(p.difficulty.as_str())
            .bind(Json(&p.alternatives))
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn training_position(&self, id: i64) -> Result<Option<TrainingPosition>, WorkerError> {
        let row: Option<PositionRow> = sqlx::query_as(&format!(
            "SELECT {POSITION_COLUMNS} FROM training_positions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TrainingPosition::try_from).transpose()
    }

    async fn training_positions(
        &self,
        player: &str,
        difficulty: Option<Difficulty>,
        limit: usize,
    ) -> Result<Vec<TrainingPosition>, WorkerError> {
        let rows: Vec<PositionRow> = sqlx::query_as(&format!(
            "SELECT {POSITION_COLUMNS} FROM training_positions \
             WHERE LOWER(player) = LOWER($1) AND ($2::TEXT IS NULL OR difficulty = $2) \
             ORDER BY times_presented ASC, id ASC LIMIT $3"
        ))
        .bind(player)
        .bind(difficulty.map(|d| d.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrainingPosition::try_from).collect()
    }

    async fn record_attempt(
        &self,
        attempt: &NewTrainingAttempt,
        solved: bool,
    ) -> Result<i64, WorkerError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"UPDATE training_positions SET
                times_presented = times_presented + 1,
                times_solved = times_solved + CASE WHEN $2 THEN 1 ELSE 0 END
            WHERE id = $1"#,
        )
        .bind(attempt.position_id)
        .bind(solved)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(WorkerError::PositionNotFound(attempt.position_id));
        }

        let (id,): (i64,) = sqlx::query_as(
            r#"INSERT INTO training_attempts (
                position_id, session_id, attempted_move, attempted_eval, verdict,
                improvement, is_better, is_best, time_spent_secs
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id"#,
        )
        .bind(attempt.position_id)
        .bind(attempt.session_id)
        .bind(&attempt.attempted_move)
        .bind(attempt.attempted_eval)
        .bind(&attempt.verdict)
        .bind(attempt.improvement)
        .bind(attempt.is_better)
        .bind(attempt.is_best)
        .bind(attempt.time_spent_secs)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(session_id) = attempt.session_id {
            sqlx::query(
                r#"UPDATE training_sessions SET
                    positions_attempted = positions_attempted + 1,
                    positions_solved = positions_solved + CASE WHEN $2 THEN 1 ELSE 0 END,
                    total_improvement = total_improvement + $3
                WHERE id = $1"#,
            )
            .bind(session_id)
            .bind(solved)
            .bind(attempt.improvement)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn attempts(&self, position_id: i64) -> Result<Vec<TrainingAttempt>, WorkerError> {
        type AttemptRow = (
            i64,
            i64,
            Option<i64>,
            String,
            i32,
            String,
            f64,
            bool,
            bool,
            i32,
            DateTime<Utc>,
        );
        let rows: Vec<AttemptRow> = sqlx::query_as(
            r#"SELECT id, position_id, session_id, attempted_move, attempted_eval, verdict,
                improvement, is_better, is_best, time_spent_secs, created_at
            FROM training_attempts WHERE position_id = $1 ORDER BY id"#,
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    position_id,
                    session_id,
                    attempted_move,
                    attempted_eval,
                    verdict,
                    improvement,
                    is_better,
                    is_best,
                    time_spent_secs,
                    created_at,
                )| TrainingAttempt {
                    id,
                    attempt: NewTrainingAttempt {
                        position_id,
                        session_id,
                        attempted_move,
                        attempted_eval,
                        verdict,
                        improvement,
                        is_better,
                        is_best,
                        time_spent_secs,
                    },
                    created_at,
                },
            )
            .collect())
    }

    async fn create_session(
        &self,
        player: &str,
        difficulty: Option<Difficulty>,
        position_ids: &[i64],
    ) -> Result<TrainingSession, WorkerError> {
        let row: SessionRow = sqlx::query_as(
            r#"INSERT INTO training_sessions (player, difficulty, position_ids)
            VALUES ($1, $2, $3)
            RETURNING id, player, difficulty, position_ids, positions_attempted,
                positions_solved, total_improvement, started_at"#,
        )
        .bind(player)
        .bind(difficulty.map(|d| d.as_str()))
        .bind(position_ids)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_session(&self, id: i64) -> Result<Option<TrainingSession>, WorkerError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"SELECT id, player, difficulty, position_ids, positions_attempted,
                positions_solved, total_improvement, started_at
            FROM training_sessions WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TrainingSession::try_from).transpose()
    }
}
