use serde::{Deserialize, Serialize};

/// One side of the board. White is the perspective every stored evaluation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn is_white(self) -> bool {
        matches!(self, Side::White)
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }

    /// Side that makes the given 1-based ply in a game started by White.
    pub fn for_ply(ply: u32) -> Side {
        if ply % 2 == 1 {
            Side::White
        } else {
            Side::Black
        }
    }
}

impl From<shakmaty::Color> for Side {
    fn from(color: shakmaty::Color) -> Self {
        match color {
            shakmaty::Color::White => Side::White,
            shakmaty::Color::Black => Side::Black,
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "white" => Ok(Side::White),
            "black" => Ok(Side::Black),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Headers and SAN tokens pulled out of a PGN text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedGame {
    pub white: String,
    pub black: String,
    pub result: String, // "1-0", "0-1", "1/2-1/2", "*"
    pub time_control: Option<String>,
    /// Custom starting position from a `SetUp`/`FEN` header pair.
    pub start_fen: Option<String>,
    pub moves: Vec<String>, // SAN notation
}
