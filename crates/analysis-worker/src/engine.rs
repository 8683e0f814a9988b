//! Engine adapter: turns raw UCI search output into candidate moves scored
//! from White's point of view.

use std::future::Future;
use std::time::Duration;

use chess_core::walker::{self, LineMove, MAX_LINE_MOVES};
use chess_core::Side;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::WorkerError;

/// Saturated score used for any forced mate.
pub const MATE_SCORE: i32 = 1000;

/// Positions with fewer pieces than this are searched deeper.
const ENDGAME_PIECES: u32 = 10;
/// Positions with more pieces than this are searched shallower.
const OPENING_PIECES: u32 = 20;

/// One search request as sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub fen: String,
    pub depth: u32,
    pub movetime: Duration,
    pub lines: u32,
    /// Restrict the search to this single UCI move
    pub restrict_to: Option<String>,
}

/// A raw principal variation, scored from the side to move as UCI reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PvLine {
    /// 1-based multipv index
    pub multipv: u32,
    pub cp: Option<i32>,
    pub mate: Option<i32>,
    pub pv: Vec<String>,
}

/// A process that can search positions. Implemented by the Stockfish
/// wrapper and by scripted engines in tests.
pub trait Engine: Send {
    fn search(
        &mut self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<Vec<PvLine>, WorkerError>> + Send;

    fn quit(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Starts engine processes on demand, one per job.
pub trait EngineLauncher: Send + Sync + 'static {
    type Engine: Engine + 'static;

    fn launch(&self) -> impl Future<Output = Result<Self::Engine, WorkerError>> + Send;
}

/// An engine suggestion after normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub rank: u32,
    pub uci: String,
    pub san: String,
    /// Centipawns from White's point of view, mates saturated to ±MATE_SCORE
    pub eval: i32,
    /// Mate distance as reported, relative to the side to move
    pub mate_in: Option<i32>,
    pub line: Vec<LineMove>,
}

/// Pick the search depth for a position from its piece count.
pub fn adaptive_depth(base: u32, pieces: u32) -> u32 {
    if pieces < ENDGAME_PIECES {
        base + 4
    } else if pieces <= OPENING_PIECES {
        base
    } else {
        base.saturating_sub(2).max(1)
    }
}

/// Convert a side-to-move score into White's point of view. Only mates
/// saturate; ordinary scores pass through unchanged.
pub fn white_cp(cp: Option<i32>, mate: Option<i32>, side_to_move: Side) -> i32 {
    let relative = match (mate, cp) {
        // mate 0: the side to move is already mated
        (Some(m), _) if m > 0 => MATE_SCORE,
        (Some(_), _) => -MATE_SCORE,
        (None, Some(cp)) => cp,
        (None, None) => 0,
    };
    if side_to_move.is_white() {
        relative
    } else {
        -relative
    }
}

/// Wraps an [`Engine`] with the normalisation, depth policy and fallback rules.
pub struct EngineAdapter<E> {
    engine: E,
}

impl<E: Engine> EngineAdapter<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub async fn quit(mut self) {
        self.engine.quit().await;
    }

    /// Top `lines` candidates for a position, best first. Falls back to a
    /// single-line search when the multi-line search fails or comes back empty.
    pub async fn evaluate(
        &mut self,
        fen: &str,
        depth: u32,
        movetime: Duration,
        lines: u32,
    ) -> Result<Vec<Candidate>, WorkerError> {
        let side = walker::side_to_move(fen)?;
        let request = SearchRequest {
            fen: fen.to_string(),
            depth,
            movetime,
            lines: lines.max(1),
            restrict_to: None,
        };

        let first = self.engine.search(&request).await;
        let raw = match first {
            Ok(raw) if !raw.is_empty() || lines <= 1 => raw,
            Err(e @ WorkerError::EngineUnavailable(_)) => return Err(e),
            other => {
                if let Err(e) = &other {
                    warn!(fen, error = %e, "Multi-line search failed, retrying single line");
                } else {
                    warn!(fen, "Multi-line search returned nothing, retrying single line");
                }
                let single = SearchRequest {
                    lines: 1,
                    ..request
                };
                self.engine.search(&single).await?
            }
        };

        let candidates = to_candidates(fen, side, raw);
        if candidates.is_empty() {
            return Err(WorkerError::Engine(format!("no usable line for {fen}")));
        }
        debug!(fen, depth, count = candidates.len(), "Position evaluated");
        Ok(candidates)
    }

    /// Evaluate one specific move from a position by restricting the search to it.
    pub async fn evaluate_move(
        &mut self,
        fen: &str,
        uci: &str,
        depth: u32,
        movetime: Duration,
    ) -> Result<Candidate, WorkerError> {
        let side = walker::side_to_move(fen)?;
        let request = SearchRequest {
            fen: fen.to_string(),
            depth,
            movetime,
            lines: 1,
            restrict_to: Some(uci.to_string()),
        };

        let raw = self.engine.search(&request).await?;
        let mut candidate = to_candidates(fen, side, raw)
            .into_iter()
            .find(|c| c.uci == uci)
            .ok_or_else(|| WorkerError::Engine(format!("no score for {uci} in {fen}")))?;
        candidate.rank = 0;
        Ok(candidate)
    }
}

fn to_candidates(fen: &str, side: Side, mut raw: Vec<PvLine>) -> Vec<Candidate> {
    raw.sort_by_key(|l| l.multipv);

    let mut out: Vec<Candidate> = Vec::with_capacity(raw.len());
    for line in raw {
        let Some(first) = line.pv.first() else {
            continue;
        };
        let Some(san) = walker::uci_to_san(fen, first) else {
            continue;
        };
        if out.iter().any(|c| &c.uci == first) {
            continue;
        }
        out.push(Candidate {
            rank: out.len() as u32 + 1,
            uci: first.clone(),
            san,
            eval: white_cp(line.cp, line.mate, side),
            mate_in: line.mate,
            line: walker::uci_line_to_san(fen, &line.pv, MAX_LINE_MOVES),
        });
    }
    out
}
