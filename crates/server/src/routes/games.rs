use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use analysis_worker::store::{AnalysisStatus, Store};

use super::{validate_player, Controller};
use crate::error::AppError;

#[derive(Deserialize)]
pub struct GamesQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// unanalyzed, analyzing, analyzed or failed
    pub status: Option<String>,
}

/// GET /api/players/{player}/games
/// The player's stored games, most recent first, with analysis status and summary.
pub async fn list_games(
    Extension(controller): Extension<Controller>,
    Path(player): Path<String>,
    Query(q): Query<GamesQuery>,
) -> Result<Json<JsonValue>, AppError> {
    validate_player(&player)?;
    let limit = match q.limit {
        Some(0) | None => 50,
        Some(n) => n.min(1000),
    };
    let offset = q.offset.unwrap_or(0);
    let status: Option<AnalysisStatus> = q
        .status
        .as_deref()
        .map(|s| s.parse().map_err(AppError::BadRequest))
        .transpose()?;

    let store = controller.store();
    let total = store.count_games(&player).await?;
    let games: Vec<_> = store
        .list_games(&player)
        .await?
        .into_iter()
        .filter(|g| status.map_or(true, |s| g.status == s))
        .skip(offset)
        .take(limit)
        .collect();

    Ok(Json(serde_json::json!({
        "player": player,
        "total": total,
        "games": games,
    })))
}

/// GET /api/players/{player}/sync-status
pub async fn sync_status(
    Extension(controller): Extension<Controller>,
    Path(player): Path<String>,
) -> Result<Json<JsonValue>, AppError> {
    validate_player(&player)?;
    let cursor = controller.store().get_cursor(&player).await?;
    Ok(Json(serde_json::json!({
        "player": player,
        "synced": cursor.is_some(),
        "cursor": cursor,
    })))
}

/// GET /api/games/{game_id}
pub async fn get_game(
    Extension(controller): Extension<Controller>,
    Path(game_id): Path<i64>,
) -> Result<Json<JsonValue>, AppError> {
    let game = controller
        .store()
        .get_game(game_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Game not found: {game_id}")))?;
    Ok(Json(serde_json::json!(game)))
}

/// GET /api/games/{game_id}/moves
/// Per-ply analysis records in ply order.
pub async fn get_game_moves(
    Extension(controller): Extension<Controller>,
    Path(game_id): Path<i64>,
) -> Result<Json<JsonValue>, AppError> {
    let store = controller.store();
    let game = store
        .get_game(game_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Game not found: {game_id}")))?;
    let moves = store.move_records(game_id).await?;

    Ok(Json(serde_json::json!({
        "game_id": game_id,
        "status": game.status,
        "summary": game.summary,
        "moves": moves,
    })))
}
