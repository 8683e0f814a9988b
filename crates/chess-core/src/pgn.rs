//! Lightweight regex-based PGN parsing.

use regex::Regex;

use crate::game_data::ParsedGame;

pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Parse a PGN string (or a bare move list) into headers and SAN tokens.
/// Returns None when the text carries no moves at all.
pub fn parse_pgn(pgn: &str) -> Option<ParsedGame> {
    let header_re = Regex::new(r#"\[(\w+)\s+"([^"]*)"\]"#).ok()?;

    let mut white = "Unknown".to_string();
    let mut black = "Unknown".to_string();
    let mut result = "*".to_string();
    let mut time_control = None;
    let mut setup = None;
    let mut fen = None;

    for cap in header_re.captures_iter(pgn) {
        let key = &cap[1];
        let value = cap[2].to_string();
        match key {
            "White" => white = value,
            "Black" => black = value,
            "Result" => result = value,
            "TimeControl" => time_control = Some(value),
            "SetUp" => setup = Some(value),
            "FEN" => fen = Some(value),
            _ => {}
        }
    }

    let start_fen = match (setup.as_deref(), fen) {
        (Some("1"), Some(f)) if f != STANDARD_START_FEN => Some(f),
        _ => None,
    };

    let moves = extract_moves(pgn);
    if moves.is_empty() {
        return None;
    }

    Some(ParsedGame {
        white,
        black,
        result,
        time_control,
        start_fen,
        moves,
    })
}

/// Headers, brace comments, NAGs and rest-of-line comments.
const NOISE: &str = r"\[[^\]]*\]|\{[^}]*\}|\$\d+|;[^\n]*";
/// Innermost variation; applied until none is left so nesting unwinds.
const VARIATION: &str = r"\([^()]*\)";
const MOVE_NUMBER: &str = r"^\d+\.+";
const RESULTS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

/// Move tokens of a PGN text in game order.
///
/// Everything left once annotations, move numbers and the result are gone
/// is returned, readable or not, so the replay can reject what it cannot
/// play instead of shortening the game.
pub fn extract_moves(pgn: &str) -> Vec<String> {
    let (Ok(noise_re), Ok(variation_re), Ok(number_re)) =
        (Regex::new(NOISE), Regex::new(VARIATION), Regex::new(MOVE_NUMBER))
    else {
        return Vec::new();
    };
    // Chess.com embeds clock annotations as comments
    let mut cleaned = noise_re.replace_all(pgn, " ").into_owned();
    while variation_re.is_match(&cleaned) {
        cleaned = variation_re.replace_all(&cleaned, " ").into_owned();
    }

    cleaned
        .split_whitespace()
        .map(|token| number_re.replace(token, ""))
        .map(|token| token.trim_end_matches(['!', '?']).to_string())
        .filter(|token| !token.is_empty() && !RESULTS.contains(&token.as_str()))
        .map(|token| {
            if token.starts_with("0-0") {
                token.replace('0', "O")
            } else {
                token
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pgn_basic() {
        let pgn = r#"[White "Player1"]
[Black "Player2"]
[Result "1-0"]
[TimeControl "600"]

1. e4 e5 2. Nf3 Nc6 1-0"#;

        let game = parse_pgn(pgn).unwrap();
        assert_eq!(game.white, "Player1");
        assert_eq!(game.black, "Player2");
        assert_eq!(game.result, "1-0");
        assert_eq!(game.time_control.as_deref(), Some("600"));
        assert_eq!(game.moves, vec!["e4", "e5", "Nf3", "Nc6"]);
        assert!(game.start_fen.is_none());
    }

    #[test]
    fn test_clock_comments_are_ignored() {
        let pgn = "1. e4 {[%clk 0:09:58.1]} 1... c5 {[%clk 0:09:57]} 2. Nf3 1-0";
        assert_eq!(extract_moves(pgn), vec!["e4", "c5", "Nf3"]);
    }

    #[test]
    fn test_castling_and_promotion_tokens() {
        let moves = extract_moves("1. O-O-O O-O 2. exd8=Q+ Kxd8#");
        assert_eq!(moves, vec!["O-O-O", "O-O", "exd8=Q+", "Kxd8#"]);
    }

    #[test]
    fn test_custom_start_position() {
        let pgn = r#"[SetUp "1"]
[FEN "8/8/8/8/8/8/4K3/4k2R w - - 0 1"]

1. Rh2 *"#;
        let game = parse_pgn(pgn).unwrap();
        assert_eq!(game.start_fen.as_deref(), Some("8/8/8/8/8/8/4K3/4k2R w - - 0 1"));
    }

    #[test]
    fn test_no_moves() {
        assert!(parse_pgn("[White \"a\"]\n\n*").is_none());
        assert!(parse_pgn("").is_none());
    }

    #[test]
    fn test_annotations_are_ignored() {
        let pgn = "1. e4 $1 (1. d4 d5) e5 ; a classical reply\n2. Nf3 *";
        assert_eq!(extract_moves(pgn), vec!["e4", "e5", "Nf3"]);
    }

    #[test]
    fn test_nested_variations_and_glyphs() {
        let pgn = "1. e4! (1. d4 d5 (1... Nf6 2. c4) 2. c4) 1... e5?! 2.Nf3 1/2-1/2";
        assert_eq!(extract_moves(pgn), vec!["e4", "e5", "Nf3"]);
    }

    #[test]
    fn test_zero_castling_is_normalized() {
        assert_eq!(extract_moves("12. 0-0 0-0-0+ 0-1"), vec!["O-O", "O-O-O+"]);
    }

    #[test]
    fn test_unreadable_tokens_are_kept() {
        assert_eq!(extract_moves("1. e4 e5 2. Qxx9?? *"), vec!["e4", "e5", "Qxx9"]);
    }
}
