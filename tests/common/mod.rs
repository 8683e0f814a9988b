//! Shared fixtures: a scripted engine, a canned archive source and a
//! knight-shuffle game whose positions the engine recognises by ply.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_worker::analyzer::AnalysisSettings;
use analysis_worker::engine::{Engine, EngineAdapter, EngineLauncher, PvLine, SearchRequest};
use analysis_worker::jobs::{JobController, JobSettings};
use analysis_worker::progress::{ProgressRegistry, WatchOptions};
use analysis_worker::store::{MemoryStore, NewGame, Store};
use analysis_worker::sync::{ArchiveGame, ArchiveSource};
use analysis_worker::training::TrainingSettings;
use analysis_worker::WorkerError;
use chrono::DateTime;

pub const PLAYER: &str = "bob";
pub const OPPONENT: &str = "alice";

/// Game moves of the shuffle, by (ply - 1) % 4.
pub const SHUFFLE_UCI: [&str; 4] = ["g1f3", "g8f6", "f3g1", "f6g8"];
pub const SHUFFLE_SAN: [&str; 4] = ["Nf3", "Nf6", "Ng1", "Ng8"];
/// A legal move the engine may prefer instead, by the same index.
pub const ALTERNATIVE_UCI: [&str; 4] = ["b1c3", "b8c6", "b1c3", "b8c6"];

/// Score of the engine's top line, from the side to move.
pub const TOP_CP: i32 = 20;

/// PGN of a game where both sides shuffle a knight out and back.
pub fn shuffle_pgn(plies: u32, white: &str, black: &str) -> String {
    let mut text = format!("[White \"{white}\"]\n[Black \"{black}\"]\n[Result \"*\"]\n\n");
    for ply in 1..=plies {
        if ply % 2 == 1 {
            text.push_str(&format!("{}. ", (ply + 1) / 2));
        }
        text.push_str(SHUFFLE_SAN[shuffle_index(ply)]);
        text.push(' ');
    }
    text.push('*');
    text
}

pub fn shuffle_index(ply: u32) -> usize {
    ((ply - 1) % 4) as usize
}

/// Ply about to be played in a shuffle position, read from the move counters.
pub fn ply_of(fen: &str) -> u32 {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    let fullmove: u32 = fields.get(5).and_then(|f| f.parse().ok()).unwrap_or(1);
    let black = fields.get(1) == Some(&"b");
    2 * (fullmove - 1) + if black { 2 } else { 1 }
}

/// How the scripted engine answers, keyed by ply.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Centipawn loss of the game move; the alternative is best when set
    pub losses: HashMap<u32, i32>,
    /// Plies where the game move is left out of the multi-line answer
    pub hidden: HashSet<u32>,
    /// Plies whose searches fail with a protocol error
    pub broken: HashSet<u32>,
    /// Searches answered before the engine goes away
    pub fail_after: Option<usize>,
    /// Time spent on every search
    pub delay: Option<Duration>,
}

impl Script {
    pub fn with_loss(mut self, ply: u32, loss: i32) -> Self {
        self.losses.insert(ply, loss);
        self
    }

    pub fn hide(mut self, ply: u32) -> Self {
        self.hidden.insert(ply);
        self
    }

    pub fn broken(mut self, ply: u32) -> Self {
        self.broken.insert(ply);
        self
    }

    pub fn dies_after(mut self, searches: usize) -> Self {
        self.fail_after = Some(searches);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

pub struct FakeEngine {
    script: Arc<Script>,
    calls: Arc<AtomicUsize>,
    pub requests: Vec<SearchRequest>,
}

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self::shared(Arc::new(script), Arc::new(AtomicUsize::new(0)))
    }

    fn shared(script: Arc<Script>, calls: Arc<AtomicUsize>) -> Self {
        Self {
            script,
            calls,
            requests: Vec::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn line(multipv: u32, uci: &str, cp: i32) -> PvLine {
    PvLine {
        multipv,
        cp: Some(cp),
        mate: None,
        pv: vec![uci.to_string()],
    }
}

impl Engine for FakeEngine {
    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<PvLine>, WorkerError> {
        self.requests.push(request.clone());
        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_after.is_some_and(|limit| n >= limit) {
            return Err(WorkerError::EngineUnavailable("engine process exited".into()));
        }

        let ply = ply_of(&request.fen);
        if self.script.broken.contains(&ply) {
            return Err(WorkerError::Engine("garbled info line".into()));
        }

        let idx = shuffle_index(ply);
        let played = SHUFFLE_UCI[idx];
        let alternative = ALTERNATIVE_UCI[idx];
        let loss = self.script.losses.get(&ply).copied().unwrap_or(0);
        let (best, other, other_cp) = if loss > 0 {
            (alternative, played, TOP_CP - loss)
        } else {
            (played, alternative, 0)
        };

        if let Some(only) = &request.restrict_to {
            let cp = if only == best {
                TOP_CP
            } else if only == other {
                other_cp
            } else {
                -50
            };
            return Ok(vec![line(1, only, cp)]);
        }

        let mut lines = vec![line(1, best, TOP_CP)];
        let hide_other = other == played && self.script.hidden.contains(&ply);
        if request.lines > 1 && !hide_other {
            lines.push(line(2, other, other_cp));
        }
        Ok(lines)
    }
}

/// Hands out scripted engines sharing one search counter.
pub struct FakeLauncher {
    script: Arc<Script>,
    calls: Arc<AtomicUsize>,
    launches: AtomicUsize,
    unavailable: bool,
}

impl FakeLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(AtomicUsize::new(0)),
            launches: AtomicUsize::new(0),
            unavailable: false,
        }
    }

    /// A launcher whose engine binary is missing.
    pub fn missing() -> Self {
        Self {
            unavailable: true,
            ..Self::new(Script::default())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl EngineLauncher for FakeLauncher {
    type Engine = FakeEngine;

    async fn launch(&self) -> Result<FakeEngine, WorkerError> {
        if self.unavailable {
            return Err(WorkerError::EngineUnavailable("stockfish not found".into()));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FakeEngine::shared(self.script.clone(), self.calls.clone()))
    }
}

pub fn adapter(script: Script) -> EngineAdapter<FakeEngine> {
    EngineAdapter::new(FakeEngine::new(script))
}

/// Monthly archives served from memory.
#[derive(Default)]
pub struct FakeArchive {
    months: Mutex<Vec<(String, Vec<ArchiveGame>)>>,
    failing: Mutex<HashSet<String>>,
    unknown_player: bool,
}

impl FakeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that has never heard of the player.
    pub fn unknown_player() -> Self {
        Self {
            unknown_player: true,
            ..Self::default()
        }
    }

    pub fn add_month(&self, name: &str, games: Vec<ArchiveGame>) {
        self.months
            .lock()
            .unwrap()
            .push((name.to_string(), games));
    }

    pub fn push_game(&self, month: &str, game: ArchiveGame) {
        let mut months = self.months.lock().unwrap();
        match months.iter_mut().find(|(name, _)| name == month) {
            Some((_, games)) => games.push(game),
            None => months.push((month.to_string(), vec![game])),
        }
    }

    pub fn fail_month(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

impl ArchiveSource for FakeArchive {
    async fn list_archives(&self, player: &str) -> Result<Vec<String>, WorkerError> {
        if self.unknown_player {
            return Err(WorkerError::PlayerNotFound(player.to_string()));
        }
        Ok(self
            .months
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn fetch_archive(&self, archive: &str) -> Result<Vec<ArchiveGame>, WorkerError> {
        if self.failing.lock().unwrap().contains(archive) {
            return Err(WorkerError::NetworkTimeout(format!("{archive} timed out")));
        }
        Ok(self
            .months
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == archive)
            .map(|(_, games)| games.clone())
            .unwrap_or_default())
    }
}

/// Archive record of a shuffle game between the opponent (White) and the player.
pub fn archive_game(id: u32, end_time: i64, plies: u32) -> ArchiveGame {
    ArchiveGame {
        uuid: format!("uuid-{id}"),
        url: format!("https://www.chess.com/game/live/{id}"),
        white: OPPONENT.to_string(),
        black: PLAYER.to_string(),
        white_result: "agreed".to_string(),
        black_result: "agreed".to_string(),
        time_control: "600".to_string(),
        rated: true,
        rules: "chess".to_string(),
        start_time: Some(end_time - 600),
        end_time,
        pgn: shuffle_pgn(plies, OPPONENT, PLAYER),
    }
}

/// A stored game with the player on Black.
pub fn new_game(external_id: &str, pgn: &str) -> NewGame {
    let end_time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    NewGame {
        external_id: external_id.to_string(),
        player: PLAYER.to_string(),
        white: OPPONENT.to_string(),
        black: PLAYER.to_string(),
        white_result: "agreed".to_string(),
        black_result: "agreed".to_string(),
        result: "agreed".to_string(),
        time_control: "600".to_string(),
        rated: true,
        start_time: end_time,
        end_time,
        pgn: pgn.to_string(),
        url: format!("https://www.chess.com/game/live/{external_id}"),
    }
}

pub async fn store_shuffle_game(store: &MemoryStore, external_id: &str, plies: u32) -> i64 {
    store
        .insert_game(&new_game(external_id, &shuffle_pgn(plies, OPPONENT, PLAYER)))
        .await
        .unwrap()
        .unwrap()
}

pub fn analysis_settings() -> AnalysisSettings {
    AnalysisSettings {
        base_depth: 12,
        movetime: Duration::from_millis(20),
        lines: 3,
    }
}

pub fn training_settings() -> TrainingSettings {
    TrainingSettings {
        depth: 14,
        movetime: Duration::from_millis(40),
    }
}

pub fn job_settings() -> JobSettings {
    JobSettings {
        analysis: analysis_settings(),
        training: training_settings(),
        watch: WatchOptions {
            poll_interval: Duration::from_millis(5),
            not_found_grace: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        },
        job_timeout: Duration::from_secs(10),
    }
}

pub type TestController = JobController<MemoryStore, FakeLauncher, FakeArchive>;

pub fn controller(
    store: Arc<MemoryStore>,
    launcher: Arc<FakeLauncher>,
    archive: Arc<FakeArchive>,
    settings: JobSettings,
) -> TestController {
    JobController::new(
        store,
        launcher,
        archive,
        Arc::new(ProgressRegistry::new(Duration::from_secs(60))),
        settings,
    )
}
