pub mod game_data;
pub mod pgn;
pub mod walker;

pub use game_data::{ParsedGame, Side};
pub use walker::{LineMove, Ply, PositionWalker, WalkError};
