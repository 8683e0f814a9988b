//! In-process store used by tests and dry runs.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    AnalysisStatus, Claim, Difficulty, Game, MoveRecord, NewGame, NewTrainingAttempt,
    NewTrainingPosition, Store, SyncCursor, TrainingAttempt, TrainingPosition, TrainingSession,
};
use crate::analysis::GameSummary;
use crate::error::WorkerError;

#[derive(Default)]
struct Inner {
    next_id: i64,
    games: HashMap<i64, Game>,
    cursors: HashMap<String, SyncCursor>,
    moves: HashMap<i64, Vec<MoveRecord>>,
    positions: HashMap<i64, TrainingPosition>,
    attempts: Vec<TrainingAttempt>,
    sessions: HashMap<i64, TrainingSession>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    async fn insert_game(&self, game: &NewGame) -> Result<Option<i64>, WorkerError> {
        let mut inner = self.inner.lock().await;
        if inner
            .games
            .values()
            .any(|g| g.info.external_id == game.external_id)
        {
            return Ok(None);
        }
        let id = inner.next_id();
        inner.games.insert(
            id,
            Game {
                id,
                info: game.clone(),
                status: AnalysisStatus::Unanalyzed,
                summary: None,
                analyzed_at: None,
            },
        );
        Ok(Some(id))
    }

    async fn get_game(&self, id: i64) -> Result<Option<Game>, WorkerError> {
        Ok(self.inner.lock().await.games.get(&id).cloned())
    }

    async fn list_games(&self, player: &str) -> Result<Vec<Game>, WorkerError> {
        let inner = self.inner.lock().await;
        let mut games: Vec<Game> = inner
            .games
            .values()
            .filter(|g| g.info.player.eq_ignore_ascii_case(player))
            .cloned()
            .collect();
        games.sort_by(|a, b| b.info.end_time.cmp(&a.info.end_time).then(b.id.cmp(&a.id)));
        Ok(games)
    }

    async fn count_games(&self, player: &str) -> Result<i64, WorkerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .games
            .values()
            .filter(|g| g.info.player.eq_ignore_ascii_case(player))
            .count() as i64)
    }

    async fn pending_games(&self, player: &str) -> Result<Vec<i64>, WorkerError> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<&Game> = inner
            .games
            .values()
            .filter(|g| g.info.player.eq_ignore_ascii_case(player))
            .filter(|g| matches!(g.status, AnalysisStatus::Unanalyzed | AnalysisStatus::Failed))
            .filter(|g| !g.info.pgn.trim().is_empty())
            .collect();
        pending.sort_by(|a, b| a.info.end_time.cmp(&b.info.end_time).then(a.id.cmp(&b.id)));
        Ok(pending.into_iter().map(|g| g.id).collect())
    }

    async fn claim_game(&self, id: i64, force: bool) -> Result<Claim, WorkerError> {
        let mut inner = self.inner.lock().await;
        let game = inner.games.get_mut(&id).ok_or(WorkerError::GameNotFound(id))?;
        match game.status {
            AnalysisStatus::Analyzing => Ok(Claim::InProgress),
            AnalysisStatus::Analyzed if !force => Ok(Claim::AlreadyAnalyzed),
            _ => {
                game.status = AnalysisStatus::Analyzing;
                Ok(Claim::Claimed(game.clone()))
            }
        }
    }

    async fn release_game(&self, id: i64) -> Result<(), WorkerError> {
        let mut inner = self.inner.lock().await;
        if let Some(game) = inner.games.get_mut(&id) {
            if game.status == AnalysisStatus::Analyzing {
                game.status = AnalysisStatus::Unanalyzed;
            }
        }
        Ok(())
    }

    async fn release_stale_claims(&self) -> Result<u64, WorkerError> {
        let mut inner = self.inner.lock().await;
        let mut released = 0;
        for game in inner.games.values_mut() {
            if game.status == AnalysisStatus::Analyzing {
                game.status = AnalysisStatus::Unanalyzed;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn finish_analysis(
        &self,
        id: i64,
        status: AnalysisStatus,
        summary: &GameSummary,
    ) -> Result<(), WorkerError> {
        let mut inner = self.inner.lock().await;
        let game = inner.games.get_mut(&id).ok_or(WorkerError::GameNotFound(id))?;
        game.status = status;
        game.summary = Some(summary.clone());
        game.analyzed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_cursor(&self, player: &str) -> Result<Option<SyncCursor>, WorkerError> {
        Ok(self
            .inner
            .lock()
            .await
            .cursors
            .get(&player.to_lowercase())
            .cloned())
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<(), WorkerError> {
        self.inner
            .lock()
            .await
            .cursors
            .insert(cursor.player.to_lowercase(), cursor.clone());
        Ok(())
    }

    async fn delete_move_records(&self, game_id: i64) -> Result<u64, WorkerError> {
        let removed = self.inner.lock().await.moves.remove(&game_id);
        Ok(removed.map(|m| m.len() as u64).unwrap_or(0))
    }

    async fn insert_move_record(&self, record: &MoveRecord) -> Result<(), WorkerError> {
        let mut inner = self.inner.lock().await;
        let records = inner.moves.entry(record.game_id).or_default();
        records.retain(|r| r.ply != record.ply);
        records.push(record.clone());
        records.sort_by_key(|r| r.ply);
        Ok(())
    }

    async fn move_records(&self, game_id: i64) -> Result<Vec<MoveRecord>, WorkerError> {
        Ok(self
            .inner
            .lock()
            .await
            .moves
            .get(&game_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_training_positions(
        &self,
        game_id: i64,
        positions: &[NewTrainingPosition],
    ) -> Result<Vec<i64>, WorkerError> {
        let mut inner = self.inner.lock().await;
        inner.positions.retain(|_, p| p.position.game_id != game_id);
        let mut ids = Vec::with_capacity(positions.len());
        for position in positions {
            let id = inner.next_id();
            inner.positions.insert(
                id,
                TrainingPosition {
                    id,
                    position: position.clone(),
                    times_presented: 0,
                    times_solved: 0,
                    created_at: Utc::now(),
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn training_position(&self, id: i64) -> Result<Option<TrainingPosition>, WorkerError> {
        Ok(self.inner.lock().await.positions.get(&id).cloned())
    }

    async fn training_positions(
        &self,
        player: &str,
        difficulty: Option<Difficulty>,
        limit: usize,
    ) -> Result<Vec<TrainingPosition>, WorkerError> {
        let inner = self.inner.lock().await;
        let mut positions: Vec<TrainingPosition> = inner
            .positions
            .values()
            .filter(|p| p.position.player.eq_ignore_ascii_case(player))
            .filter(|p| difficulty.map_or(true, |d| p.position.difficulty == d))
            .cloned()
            .collect();
        positions.sort_by_key(|p| (p.times_presented, p.id));
        positions.truncate(limit);
        Ok(positions)
    }

    async fn record_attempt(
        &self,
        attempt: &NewTrainingAttempt,
        solved: bool,
    ) -> Result<i64, WorkerError> {
        let mut inner = self.inner.lock().await;
        let position = inner
            .positions
            .get_mut(&attempt.position_id)
            .ok_or(WorkerError::PositionNotFound(attempt.position_id))?;
        position.times_presented += 1;
        if solved {
            position.times_solved += 1;
        }

        if let Some(session_id) = attempt.session_id {
            if let Some(session) = inner.sessions.get_mut(&session_id) {
                session.positions_attempted += 1;
                if solved {
                    session.positions_solved += 1;
                }
                session.total_improvement += attempt.improvement;
            }
        }

        let id = inner.next_id();
        inner.attempts.push(TrainingAttempt {
            id,
            attempt: attempt.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn attempts(&self, position_id: i64) -> Result<Vec<TrainingAttempt>, WorkerError> {
        Ok(self
            .inner
            .lock()
            .await
            .attempts
            .iter()
            .filter(|a| a.attempt.position_id == position_id)
            .cloned()
            .collect())
    }

    async fn create_session(
        &self,
        player: &str,
        difficulty: Option<Difficulty>,
        position_ids: &[i64],
    ) -> Result<TrainingSession, WorkerError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let session = TrainingSession {
            id,
            player: player.to_string(),
            difficulty,
            position_ids: position_ids.to_vec(),
            positions_attempted: 0,
            positions_solved: 0,
            total_improvement: 0.0,
            started_at: Utc::now(),
        };
        inner.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: i64) -> Result<Option<TrainingSession>, WorkerError> {
        Ok(self.inner.lock().await.sessions.get(&id).cloned())
    }
}
