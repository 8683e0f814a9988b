use axum::{Extension, Json};
use serde_json::Value as JsonValue;

use super::Controller;
use crate::error::AppError;

/// GET /health
pub async fn health_check(
    Extension(controller): Extension<Controller>,
) -> Result<Json<JsonValue>, AppError> {
    sqlx::query("SELECT 1")
        .execute(controller.store().pool())
        .await?;
    let active_jobs = controller.registry().len().await;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "tracked_jobs": active_jobs,
    })))
}
