use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use validator::Validate;

use analysis_worker::store::Store;
use analysis_worker::training::SESSION_MAX_POSITIONS;

use super::{parse_difficulty, validate_player, Controller};
use crate::error::AppError;

#[derive(Deserialize)]
pub struct DifficultyQuery {
    pub difficulty: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct NextQuery {
    #[serde(default)]
    pub after: i64,
}

#[derive(Deserialize, Validate)]
pub struct AttemptBody {
    #[validate(range(min = 1))]
    pub position_id: i64,
    pub session_id: Option<i64>,
    /// UCI or SAN
    #[serde(rename = "move")]
    #[validate(length(min = 1, max = 16))]
    pub attempted: String,
    #[serde(default)]
    #[validate(range(min = 0, max = 86400))]
    pub time_spent: i32,
}

/// POST /api/players/{player}/training/sessions?difficulty=hard
/// Open a session over the player's least-practised positions.
pub async fn start_session(
    Extension(controller): Extension<Controller>,
    Path(player): Path<String>,
    Query(q): Query<DifficultyQuery>,
) -> Result<Json<JsonValue>, AppError> {
    validate_player(&player)?;
    let difficulty = parse_difficulty(q.difficulty.as_deref())?;
    let session = controller.start_training_session(&player, difficulty).await?;
    Ok(Json(serde_json::json!(session)))
}

/// GET /api/players/{player}/training/positions?difficulty=medium&limit=20
pub async fn list_positions(
    Extension(controller): Extension<Controller>,
    Path(player): Path<String>,
    Query(q): Query<DifficultyQuery>,
) -> Result<Json<JsonValue>, AppError> {
    validate_player(&player)?;
    let difficulty = parse_difficulty(q.difficulty.as_deref())?;
    let limit = q.limit.unwrap_or(SESSION_MAX_POSITIONS).clamp(1, 500);
    let positions = controller
        .store()
        .training_positions(&player, difficulty, limit)
        .await?;
    Ok(Json(serde_json::json!({
        "player": player,
        "positions": positions,
    })))
}

/// GET /api/players/{player}/training/next?after=12
pub async fn next_position(
    Extension(controller): Extension<Controller>,
    Path(player): Path<String>,
    Query(q): Query<NextQuery>,
) -> Result<Json<JsonValue>, AppError> {
    validate_player(&player)?;
    let next = controller.next_training_position(&player, q.after).await?;
    Ok(Json(serde_json::json!({ "next_position_id": next })))
}

/// GET /api/training/positions/{position_id}
pub async fn get_position(
    Extension(controller): Extension<Controller>,
    Path(position_id): Path<i64>,
) -> Result<Json<JsonValue>, AppError> {
    let position = controller
        .store()
        .training_position(position_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Training position not found: {position_id}")))?;
    Ok(Json(serde_json::json!(position)))
}

/// GET /api/training/positions/{position_id}/attempts
pub async fn list_attempts(
    Extension(controller): Extension<Controller>,
    Path(position_id): Path<i64>,
) -> Result<Json<JsonValue>, AppError> {
    let attempts = controller.store().attempts(position_id).await?;
    Ok(Json(serde_json::json!({
        "position_id": position_id,
        "attempts": attempts,
    })))
}

/// GET /api/training/sessions/{session_id}
pub async fn get_session(
    Extension(controller): Extension<Controller>,
    Path(session_id): Path<i64>,
) -> Result<Json<JsonValue>, AppError> {
    let session = controller
        .store()
        .get_session(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Training session not found: {session_id}")))?;
    Ok(Json(serde_json::json!(session)))
}

/// POST /api/training/attempts
/// Grade a move on a training position. Illegal moves are a 400 and are not recorded.
pub async fn submit_attempt(
    Extension(controller): Extension<Controller>,
    Json(body): Json<AttemptBody>,
) -> Result<Json<JsonValue>, AppError> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let verdict = controller
        .submit_training_attempt(
            body.position_id,
            body.session_id,
            &body.attempted,
            body.time_spent,
        )
        .await?;
    Ok(Json(serde_json::json!(verdict)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_body() {
        let body: AttemptBody =
            serde_json::from_str(r#"{"position_id": 4, "move": "Nf3", "time_spent": 12}"#).unwrap();
        assert_eq!(body.attempted, "Nf3");
        assert_eq!(body.session_id, None);
        assert!(body.validate().is_ok());

        let empty: AttemptBody =
            serde_json::from_str(r#"{"position_id": 4, "move": ""}"#).unwrap();
        assert!(empty.validate().is_err());

        let bad_id: AttemptBody =
            serde_json::from_str(r#"{"position_id": 0, "move": "e4"}"#).unwrap();
        assert!(bad_id.validate().is_err());
    }
}
