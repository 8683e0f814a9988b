//! Position walker: replays a move list and yields the position before and
//! after every ply.

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::{San, SanPlus};
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, Position};
use thiserror::Error;

use crate::game_data::Side;
use crate::pgn;

/// Maximum number of moves kept when converting an engine line to SAN.
pub const MAX_LINE_MOVES: usize = 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalkError {
    #[error("no moves found in game text")]
    Empty,

    #[error("unreadable move '{token}' at ply {ply}")]
    BadToken { ply: u32, token: String },

    #[error("illegal move '{san}' at ply {ply}")]
    IllegalMove { ply: u32, san: String },

    #[error("invalid FEN '{0}'")]
    BadFen(String),
}

/// One replayed half-move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ply {
    /// 1-based ply index
    pub ply: u32,
    pub move_number: u32,
    pub side_to_move: Side,
    pub san: String,
    pub uci: String,
    pub fen_before: String,
    pub fen_after: String,
    /// Pieces on the board before the move, kings included
    pub piece_count: u32,
}

/// A move of an engine line rendered for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMove {
    pub san: String,
    pub uci: String,
    pub move_number: u32,
    pub is_white: bool,
}

/// A fully validated game. Iterating it is lazy and can be restarted any
/// number of times.
#[derive(Debug, Clone)]
pub struct PositionWalker {
    start: Chess,
    moves: Vec<Move>,
}

impl PositionWalker {
    /// Tokenize PGN or bare SAN text and check every move is legal from the
    /// starting position.
    pub fn from_pgn(text: &str) -> Result<Self, WalkError> {
        let parsed = pgn::parse_pgn(text).ok_or(WalkError::Empty)?;
        let start = match parsed.start_fen.as_deref() {
            Some(fen) => parse_fen(fen)?,
            None => Chess::default(),
        };
        Self::from_san_moves(start, &parsed.moves)
    }

    pub fn from_san_moves<S: AsRef<str>>(start: Chess, sans: &[S]) -> Result<Self, WalkError> {
        if sans.is_empty() {
            return Err(WalkError::Empty);
        }

        let mut pos = start.clone();
        let mut moves = Vec::with_capacity(sans.len());
        for (i, token) in sans.iter().enumerate() {
            let ply = i as u32 + 1;
            let token = token.as_ref();
            let san_plus: SanPlus = token.parse().map_err(|_| WalkError::BadToken {
                ply,
                token: token.to_string(),
            })?;
            let mv = san_plus.san.to_move(&pos).map_err(|_| WalkError::IllegalMove {
                ply,
                san: token.to_string(),
            })?;
            pos.play_unchecked(mv.clone());
            moves.push(mv);
        }

        Ok(Self { start, moves })
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn plies(&self) -> Plies<'_> {
        Plies {
            pos: self.start.clone(),
            moves: self.moves.iter(),
            ply: 0,
        }
    }
}

/// Lazy iterator over the plies of a [`PositionWalker`].
pub struct Plies<'a> {
    pos: Chess,
    moves: std::slice::Iter<'a, Move>,
    ply: u32,
}

impl Iterator for Plies<'_> {
    type Item = Ply;

    fn next(&mut self) -> Option<Ply> {
        let mv = self.moves.next()?.clone();
        self.ply += 1;

        let side_to_move = Side::from(self.pos.turn());
        let move_number = self.pos.fullmoves().get();
        let fen_before = fen_of(&self.pos);
        let piece_count = self.pos.board().occupied().count() as u32;
        let uci = mv.to_uci(CastlingMode::Standard).to_string();
        let san = San::from_move(&self.pos, mv.clone());

        self.pos.play_unchecked(mv);
        let san = with_suffix(san, &self.pos);

        Some(Ply {
            ply: self.ply,
            move_number,
            side_to_move,
            san,
            uci,
            fen_before,
            fen_after: fen_of(&self.pos),
            piece_count,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.moves.size_hint()
    }
}

impl ExactSizeIterator for Plies<'_> {}

pub fn parse_fen(fen: &str) -> Result<Chess, WalkError> {
    let parsed: Fen = fen.parse().map_err(|_| WalkError::BadFen(fen.to_string()))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|_| WalkError::BadFen(fen.to_string()))
}

pub fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

/// Number of pieces (both colours, kings included) in a FEN position.
pub fn piece_count(fen: &str) -> Result<u32, WalkError> {
    Ok(parse_fen(fen)?.board().occupied().count() as u32)
}

pub fn side_to_move(fen: &str) -> Result<Side, WalkError> {
    Ok(Side::from(parse_fen(fen)?.turn()))
}

/// True when the position has no legal moves (mate or stalemate).
pub fn is_terminal(fen: &str) -> Result<bool, WalkError> {
    let pos = parse_fen(fen)?;
    Ok(pos.is_checkmate() || pos.is_stalemate())
}

/// Resolve a UCI move string against a position. None if it is malformed
/// or illegal there.
pub fn legal_uci_move(pos: &Chess, uci: &str) -> Option<Move> {
    let parsed: UciMove = uci.parse().ok()?;
    parsed.to_move(pos).ok()
}

/// SAN of a single UCI move from the given position.
pub fn uci_to_san(fen: &str, uci: &str) -> Option<String> {
    let pos = parse_fen(fen).ok()?;
    let mv = legal_uci_move(&pos, uci)?;
    let san = San::from_move(&pos, mv.clone());
    let mut after = pos;
    after.play_unchecked(mv);
    Some(with_suffix(san, &after))
}

/// SAN of a SAN-or-UCI move token, normalised to the canonical spelling.
/// Used to compare user input against stored moves.
pub fn normalize_move(fen: &str, token: &str) -> Option<String> {
    resolve_move(fen, token).map(|(_, san)| san)
}

/// Resolve a SAN-or-UCI token into `(uci, san)`. None when the token is
/// unreadable or not legal in the position.
pub fn resolve_move(fen: &str, token: &str) -> Option<(String, String)> {
    let pos = parse_fen(fen).ok()?;
    let token = token.trim();
    let mv = match legal_uci_move(&pos, token) {
        Some(mv) => mv,
        None => {
            let san_plus: SanPlus = token.parse().ok()?;
            san_plus.san.to_move(&pos).ok()?
        }
    };
    let uci = mv.to_uci(CastlingMode::Standard).to_string();
    let san = San::from_move(&pos, mv.clone());
    let mut after = pos;
    after.play_unchecked(mv);
    Some((uci, with_suffix(san, &after)))
}

/// Convert an engine principal variation (UCI) into display moves, stopping
/// at the first move that does not apply or after `limit` moves.
pub fn uci_line_to_san(fen: &str, line: &[String], limit: usize) -> Vec<LineMove> {
    let Ok(mut pos) = parse_fen(fen) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for uci in line.iter().take(limit) {
        let Some(mv) = legal_uci_move(&pos, uci) else {
            break;
        };
        let is_white = pos.turn().is_white();
        let move_number = pos.fullmoves().get();
        let san = San::from_move(&pos, mv.clone());
        pos.play_unchecked(mv);
        out.push(LineMove {
            san: with_suffix(san, &pos),
            uci: uci.clone(),
            move_number,
            is_white,
        });
    }
    out
}

fn with_suffix(san: San, after: &Chess) -> String {
    if after.is_checkmate() {
        format!("{san}#")
    } else if after.is_check() {
        format!("{san}+")
    } else {
        san.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";

    #[test]
    fn test_walk_simple_game() {
        let walker = PositionWalker::from_pgn("1. e4 e5 2. Nf3 Nc6").unwrap();
        let plies: Vec<Ply> = walker.plies().collect();

        assert_eq!(plies.len(), 4);
        assert_eq!(plies[0].ply, 1);
        assert_eq!(plies[0].side_to_move, Side::White);
        assert_eq!(plies[0].fen_before, pgn::STANDARD_START_FEN);
        assert_eq!(plies[0].fen_after, AFTER_E4);
        assert_eq!(plies[0].uci, "e2e4");
        assert_eq!(plies[0].piece_count, 32);
        assert_eq!(plies[1].side_to_move, Side::Black);
        assert_eq!(plies[1].fen_before, AFTER_E4);
        assert_eq!(plies[2].move_number, 2);
        assert_eq!(plies[3].san, "Nc6");
    }

    #[test]
    fn test_walk_is_restartable() {
        let walker = PositionWalker::from_pgn("1. d4 d5 2. c4").unwrap();
        let first: Vec<Ply> = walker.plies().collect();
        let second: Vec<Ply> = walker.plies().collect();
        assert_eq!(first, second);
        assert_eq!(walker.plies().len(), 3);
    }

    #[test]
    fn test_illegal_move_is_rejected() {
        let err = PositionWalker::from_pgn("1. e4 e5 2. Ke3").unwrap_err();
        assert_eq!(
            err,
            WalkError::IllegalMove {
                ply: 3,
                san: "Ke3".to_string()
            }
        );
    }

    #[test]
    fn test_zero_castling_is_played() {
        let walker = PositionWalker::from_pgn("1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5 4. 0-0 *").unwrap();
        let last = walker.plies().last().unwrap();
        assert_eq!(walker.len(), 7);
        assert_eq!(last.san, "O-O");
        assert_eq!(last.uci, "e1g1");
    }

    #[test]
    fn test_unreadable_move_is_rejected() {
        let pgn = "1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5 4. Qxx9?? *";
        let err = PositionWalker::from_pgn(pgn).unwrap_err();
        assert_eq!(
            err,
            WalkError::BadToken {
                ply: 7,
                token: "Qxx9".to_string()
            }
        );
    }

    #[test]
    fn test_empty_game() {
        assert_eq!(PositionWalker::from_pgn("").unwrap_err(), WalkError::Empty);
        assert_eq!(
            PositionWalker::from_pgn("[Event \"x\"]\n\n*").unwrap_err(),
            WalkError::Empty
        );
    }

    #[test]
    fn test_check_suffix() {
        let walker = PositionWalker::from_pgn("1. f3 e5 2. g4 Qh4#").unwrap();
        let last = walker.plies().last().unwrap();
        assert_eq!(last.san, "Qh4#");
        assert!(is_terminal(&last.fen_after).unwrap());
    }

    #[test]
    fn test_uci_line_to_san() {
        let line: Vec<String> = ["e2e4", "e7e5", "g1f3", "zzzz", "b8c6"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let moves = uci_line_to_san(pgn::STANDARD_START_FEN, &line, MAX_LINE_MOVES);
        let sans: Vec<&str> = moves.iter().map(|m| m.san.as_str()).collect();
        assert_eq!(sans, vec!["e4", "e5", "Nf3"]);
        assert!(moves[0].is_white);
        assert!(!moves[1].is_white);
        assert_eq!(moves[2].move_number, 2);
    }

    #[test]
    fn test_uci_line_respects_limit() {
        let line: Vec<String> = ["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6", "d2d3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(uci_line_to_san(pgn::STANDARD_START_FEN, &line, 6).len(), 6);
    }

    #[test]
    fn test_normalize_move() {
        assert_eq!(normalize_move(pgn::STANDARD_START_FEN, "g1f3").as_deref(), Some("Nf3"));
        assert_eq!(normalize_move(pgn::STANDARD_START_FEN, "Nf3").as_deref(), Some("Nf3"));
        assert_eq!(normalize_move(pgn::STANDARD_START_FEN, "e2e5"), None);
        assert_eq!(side_to_move(AFTER_E4).unwrap(), Side::Black);
        assert_eq!(piece_count("8/8/8/8/8/8/4K3/4k2R w - - 0 1").unwrap(), 3);
    }

    #[test]
    fn test_resolve_move() {
        let start = pgn::STANDARD_START_FEN;
        assert_eq!(
            resolve_move(start, "Nf3"),
            Some(("g1f3".to_string(), "Nf3".to_string()))
        );
        assert_eq!(
            resolve_move(start, " e2e4 "),
            Some(("e2e4".to_string(), "e4".to_string()))
        );
        assert_eq!(resolve_move(start, "Qh5"), None);
        assert_eq!(resolve_move(start, "hello"), None);
    }
}
