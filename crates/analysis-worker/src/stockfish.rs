//! Stockfish engine wrapper using UCI protocol (async I/O)

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::engine::{Engine, EngineLauncher, PvLine, SearchRequest};
use crate::error::WorkerError;

/// Time allowed for handshake replies (`uciok`, `readyok`).
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Extra time on top of the movetime before a silent engine is declared dead.
const SEARCH_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub path: String,
    pub threads: u32,
    pub hash_mb: u32,
}

/// Stockfish engine instance
pub struct StockfishEngine {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    multipv: u32,
}

impl StockfishEngine {
    /// Spawn a new Stockfish process and initialize UCI
    pub async fn new(options: &EngineOptions) -> Result<Self, WorkerError> {
        let mut process = Command::new(&options.path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkerError::EngineUnavailable(format!("failed to spawn {}: {e}", options.path))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| WorkerError::EngineUnavailable("engine stdin not captured".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| WorkerError::EngineUnavailable("engine stdout not captured".into()))?;

        let mut engine = Self {
            process,
            stdin,
            stdout: BufReader::new(stdout),
            multipv: 1,
        };

        engine.send("uci").await?;
        engine.wait_for("uciok", HANDSHAKE_TIMEOUT).await?;

        engine
            .send(&format!("setoption name Threads value {}", options.threads))
            .await?;
        engine
            .send(&format!("setoption name Hash value {}", options.hash_mb))
            .await?;
        engine.send("setoption name UCI_AnalyseMode value true").await?;
        engine.send("isready").await?;
        engine.wait_for("readyok", HANDSHAKE_TIMEOUT).await?;

        Ok(engine)
    }

    /// Send a command to Stockfish
    async fn send(&mut self, cmd: &str) -> Result<(), WorkerError> {
        debug!(cmd, "SF <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| WorkerError::EngineUnavailable(format!("write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| WorkerError::EngineUnavailable(format!("flush failed: {e}")))?;
        Ok(())
    }

    /// Read one line, treating EOF or silence past `limit` as a dead engine.
    async fn read_line(&mut self, limit: Duration) -> Result<String, WorkerError> {
        let mut line = String::new();
        let read = timeout(limit, self.stdout.read_line(&mut line))
            .await
            .map_err(|_| WorkerError::EngineUnavailable(format!("no reply within {limit:?}")))?
            .map_err(|e| WorkerError::EngineUnavailable(format!("read failed: {e}")))?;
        if read == 0 {
            return Err(WorkerError::EngineUnavailable("engine process exited".into()));
        }
        let trimmed = line.trim().to_string();
        debug!(line = %trimmed, "SF >");
        Ok(trimmed)
    }

    /// Wait for a specific response line
    async fn wait_for(&mut self, expected: &str, limit: Duration) -> Result<(), WorkerError> {
        loop {
            if self.read_line(limit).await? == expected {
                return Ok(());
            }
        }
    }

    async fn set_multipv(&mut self, lines: u32) -> Result<(), WorkerError> {
        if self.multipv != lines {
            self.send(&format!("setoption name MultiPV value {lines}"))
                .await?;
            self.multipv = lines;
        }
        Ok(())
    }
}

impl Engine for StockfishEngine {
    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<PvLine>, WorkerError> {
        self.set_multipv(request.lines.max(1)).await?;
        self.send(&format!("position fen {}", request.fen)).await?;
        self.send(&go_command(request)).await?;

        let limit = request.movetime + SEARCH_GRACE;
        let mut lines: BTreeMap<u32, PvLine> = BTreeMap::new();

        loop {
            let line = self.read_line(limit).await?;

            if line.starts_with("bestmove") {
                break;
            }
            if let Some(pv) = parse_info_line(&line) {
                lines.insert(pv.multipv, pv);
            }
        }

        Ok(lines.into_values().collect())
    }

    async fn quit(&mut self) {
        let _ = self.send("quit").await;
        let _ = self.process.wait().await;
    }
}

impl Drop for StockfishEngine {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}

/// Spawns a fresh Stockfish process per job.
#[derive(Debug, Clone)]
pub struct StockfishLauncher {
    options: EngineOptions,
}

impl StockfishLauncher {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }
}

impl EngineLauncher for StockfishLauncher {
    type Engine = StockfishEngine;

    async fn launch(&self) -> Result<StockfishEngine, WorkerError> {
        let engine = StockfishEngine::new(&self.options).await?;
        info!(path = %self.options.path, "Stockfish engine ready");
        Ok(engine)
    }
}

fn go_command(request: &SearchRequest) -> String {
    let mut cmd = format!(
        "go depth {} movetime {}",
        request.depth,
        request.movetime.as_millis().max(1)
    );
    if let Some(mv) = &request.restrict_to {
        cmd.push_str(" searchmoves ");
        cmd.push_str(mv);
    }
    cmd
}

/// Parse a scored `info ... pv ...` line. Bound scores and string output are skipped.
fn parse_info_line(line: &str) -> Option<PvLine> {
    if !line.starts_with("info") || !line.contains(" pv ") {
        return None;
    }
    if line.contains(" lowerbound") || line.contains(" upperbound") {
        return None;
    }

    let cp = parse_cp(line);
    let mate = parse_mate(line);
    if cp.is_none() && mate.is_none() {
        return None;
    }

    Some(PvLine {
        multipv: parse_multipv_index(line).unwrap_or(1),
        cp,
        mate,
        pv: parse_pv(line),
    })
}

fn value_after<T: std::str::FromStr>(line: &str, key: &str) -> Option<T> {
    let mut parts = line.split_whitespace();
    while let Some(part) = parts.next() {
        if part == key {
            return parts.next()?.parse().ok();
        }
    }
    None
}

/// Parse centipawn score from info line
fn parse_cp(line: &str) -> Option<i32> {
    value_after(line, "cp")
}

/// Parse mate score from info line
fn parse_mate(line: &str) -> Option<i32> {
    value_after(line, "mate")
}

/// Parse multipv index from info line
fn parse_multipv_index(line: &str) -> Option<u32> {
    value_after(line, "multipv")
}

/// Parse PV moves from info line
fn parse_pv(line: &str) -> Vec<String> {
    line.split_whitespace()
        .skip_while(|part| *part != "pv")
        .skip(1)
        .take_while(|part| !part.starts_with("bmc") && *part != "string")
        .map(|s| s.to_string())
        .collect()
}
