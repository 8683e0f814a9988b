//! Move classification: pure functions only
//! (No Board/Engine/Store dependencies)

use chess_core::Side;
use serde::{Deserialize, Serialize};

/// Classification thresholds (centipawn loss)
const THRESHOLD_BEST: i32 = 10;
const THRESHOLD_GOOD: i32 = 20;
const THRESHOLD_INACCURACY: i32 = 70;
const THRESHOLD_MISTAKE: i32 = 100;
const THRESHOLD_BLUNDER: i32 = 200;

/// A move ranked at or above this among the engine's lines can be "good".
const GOOD_MAX_RANK: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Best,
    Good,
    Acceptable,
    Inaccuracy,
    Mistake,
    Blunder,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::Good => "good",
            Quality::Acceptable => "acceptable",
            Quality::Inaccuracy => "inaccuracy",
            Quality::Mistake => "mistake",
            Quality::Blunder => "blunder",
        }
    }

    /// Inaccuracies, mistakes and blunders count as errors in summaries.
    pub fn is_error(self) -> bool {
        matches!(self, Quality::Inaccuracy | Quality::Mistake | Quality::Blunder)
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best" => Ok(Quality::Best),
            "good" => Ok(Quality::Good),
            "acceptable" => Ok(Quality::Acceptable),
            "inaccuracy" => Ok(Quality::Inaccuracy),
            "mistake" => Ok(Quality::Mistake),
            "blunder" => Ok(Quality::Blunder),
            other => Err(format!("unknown move quality: {other}")),
        }
    }
}

/// Centipawn loss of the played move against the engine's best, both
/// scored from White's point of view. Never negative.
pub fn centipawn_loss(best_eval: i32, played_eval: i32, side_to_move: Side) -> i32 {
    let loss = if side_to_move.is_white() {
        best_eval - played_eval
    } else {
        played_eval - best_eval
    };
    loss.max(0)
}

/// Quality tier for a loss. `rank` is the played move's 1-based position
/// among the engine's lines, None when it was outside them.
pub fn classify_move(cp_loss: i32, rank: Option<u32>) -> Quality {
    if cp_loss < THRESHOLD_BEST {
        Quality::Best
    } else if rank.is_some_and(|r| r <= GOOD_MAX_RANK) && cp_loss < THRESHOLD_GOOD {
        Quality::Good
    } else if cp_loss >= THRESHOLD_BLUNDER {
        Quality::Blunder
    } else if cp_loss >= THRESHOLD_MISTAKE {
        Quality::Mistake
    } else if cp_loss >= THRESHOLD_INACCURACY {
        Quality::Inaccuracy
    } else {
        Quality::Acceptable
    }
}

pub fn classify(
    best_eval: i32,
    played_eval: i32,
    side_to_move: Side,
    rank: Option<u32>,
) -> (i32, Quality) {
    let loss = centipawn_loss(best_eval, played_eval, side_to_move);
    (loss, classify_move(loss, rank))
}

/// Display accuracy for a single move, 0 to 100.
pub fn move_accuracy(cp_loss: i32) -> f64 {
    (100.0 - cp_loss as f64 / 2.0).max(0.0)
}

/// Per-game totals stored next to the game once analysis finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub best: u32,
    pub good: u32,
    pub acceptable: u32,
    pub inaccuracies: u32,
    pub mistakes: u32,
    pub blunders: u32,
    pub errors: u32,
    pub plies_total: u32,
    pub plies_analyzed: u32,
    pub plies_skipped: u32,
    pub average_accuracy: f64,
    pub base_depth: u32,
    pub movetime_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip)]
    accuracy_total: f64,
}

impl GameSummary {
    pub fn new(plies_total: u32, base_depth: u32, movetime_ms: u64) -> Self {
        Self {
            plies_total,
            base_depth,
            movetime_ms,
            ..Self::default()
        }
    }

    pub fn with_note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::default()
        }
    }

    pub fn record(&mut self, quality: Quality, accuracy: f64) {
        match quality {
            Quality::Best => self.best += 1,
            Quality::Good => self.good += 1,
            Quality::Acceptable => self.acceptable += 1,
            Quality::Inaccuracy => self.inaccuracies += 1,
            Quality::Mistake => self.mistakes += 1,
            Quality::Blunder => self.blunders += 1,
        }
        if quality.is_error() {
            self.errors += 1;
        }
        self.plies_analyzed += 1;
        self.accuracy_total += accuracy;
        self.average_accuracy =
            (self.accuracy_total / self.plies_analyzed as f64 * 10.0).round() / 10.0;
    }

    pub fn skip(&mut self) {
        self.plies_skipped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_move() {
        assert_eq!(classify_move(0, Some(1)), Quality::Best);
        assert_eq!(classify_move(9, None), Quality::Best);
        assert_eq!(classify_move(15, Some(3)), Quality::Good);
        assert_eq!(classify_move(15, Some(6)), Quality::Acceptable);
        assert_eq!(classify_move(15, None), Quality::Acceptable);
        assert_eq!(classify_move(69, Some(2)), Quality::Acceptable);
        assert_eq!(classify_move(70, Some(2)), Quality::Inaccuracy);
        assert_eq!(classify_move(100, None), Quality::Mistake);
        assert_eq!(classify_move(199, None), Quality::Mistake);
        assert_eq!(classify_move(200, Some(1)), Quality::Blunder);
    }

    #[test]
    fn test_tiers_partition_the_loss_range() {
        let order = [
            Quality::Best,
            Quality::Good,
            Quality::Acceptable,
            Quality::Inaccuracy,
            Quality::Mistake,
            Quality::Blunder,
        ];
        for rank in [Some(1), Some(5), Some(6), None] {
            let mut last = 0usize;
            for loss in 0..=2000 {
                let tier = classify_move(loss, rank);
                let idx = order.iter().position(|q| *q == tier).unwrap();
                assert!(idx >= last, "tiers must not go backwards at loss {loss}");
                last = idx;
            }
        }
    }

    #[test]
    fn test_loss_sign_follows_side_to_move() {
        // White had +50 available and played into +10
        assert_eq!(centipawn_loss(50, 10, Side::White), 40);
        // Black had -50 available (good for Black) and played into +10
        assert_eq!(centipawn_loss(-50, 10, Side::Black), 60);
        // Played move scored better than the engine's best: clamp to zero
        assert_eq!(centipawn_loss(10, 30, Side::White), 0);
        assert_eq!(centipawn_loss(10, -30, Side::Black), 0);
    }

    #[test]
    fn test_large_scores_keep_their_difference() {
        // A won position thrown from +15 to +11 is still a blunder
        let best = crate::engine::white_cp(Some(1500), None, Side::White);
        let played = crate::engine::white_cp(Some(1100), None, Side::White);
        assert_eq!(classify(best, played, Side::White, None), (400, Quality::Blunder));

        let best = crate::engine::white_cp(Some(1300), None, Side::Black);
        let played = crate::engine::white_cp(Some(1150), None, Side::Black);
        assert_eq!(classify(best, played, Side::Black, Some(2)), (150, Quality::Mistake));
    }

    #[test]
    fn test_loss_is_never_negative() {
        for best in (-1000..=1000).step_by(125) {
            for played in (-1000..=1000).step_by(125) {
                assert!(centipawn_loss(best, played, Side::White) >= 0);
                assert!(centipawn_loss(best, played, Side::Black) >= 0);
            }
        }
    }

    #[test]
    fn test_move_accuracy() {
        assert_eq!(move_accuracy(0), 100.0);
        assert_eq!(move_accuracy(50), 75.0);
        assert_eq!(move_accuracy(250), 0.0);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = GameSummary::new(4, 18, 500);
        summary.record(Quality::Best, 100.0);
        summary.record(Quality::Blunder, 0.0);
        summary.record(Quality::Inaccuracy, 60.0);
        summary.skip();

        assert_eq!(summary.plies_analyzed, 3);
        assert_eq!(summary.plies_skipped, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.blunders, 1);
        assert_eq!(summary.average_accuracy, 53.3);
    }
}
