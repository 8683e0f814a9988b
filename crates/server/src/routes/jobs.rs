use std::convert::Infallible;

use axum::{
    extract::{Path, Query},
    response::sse::{Event, Sse},
    Extension, Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use validator::Validate;

use analysis_worker::sync::SyncOptions;

use super::{validate_player, Controller};
use crate::error::AppError;

#[derive(Deserialize, Validate)]
pub struct SyncQuery {
    #[serde(default)]
    pub full: bool,
    /// Most recent archive months to scan
    #[validate(range(min = 1, max = 240))]
    pub months: Option<usize>,
}

#[derive(Deserialize)]
pub struct AnalyzeQuery {
    #[serde(default)]
    pub force: bool,
}

fn started(job_id: String) -> Json<JsonValue> {
    Json(serde_json::json!({ "job_id": job_id, "status": "started" }))
}

/// POST /api/players/{player}/sync?full=true&months=3
/// Sync the player's archive, then analyse every new game.
pub async fn start_sync(
    Extension(controller): Extension<Controller>,
    Path(player): Path<String>,
    Query(q): Query<SyncQuery>,
) -> Result<Json<JsonValue>, AppError> {
    validate_player(&player)?;
    q.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let options = SyncOptions {
        force_full: q.full,
        months_limit: q.months,
    };
    let job_id = controller.start_sync_and_analyze(&player, options).await?;
    Ok(started(job_id))
}

/// POST /api/players/{player}/analyze
/// Analyse the player's stored games that have not been analysed yet.
pub async fn analyze_pending(
    Extension(controller): Extension<Controller>,
    Path(player): Path<String>,
) -> Result<Json<JsonValue>, AppError> {
    validate_player(&player)?;
    let job_id = controller.analyze_pending(&player).await?;
    Ok(started(job_id))
}

/// POST /api/players/{player}/games/{game_id}/analyze?force=true
pub async fn analyze_game(
    Extension(controller): Extension<Controller>,
    Path((player, game_id)): Path<(String, i64)>,
    Query(q): Query<AnalyzeQuery>,
) -> Result<Json<JsonValue>, AppError> {
    validate_player(&player)?;
    let job_id = controller.analyze_game(&player, game_id, q.force).await?;
    Ok(started(job_id))
}

/// GET /api/players/{player}/jobs
/// Jobs still running for the player, so a client can resume its display.
pub async fn active_jobs(
    Extension(controller): Extension<Controller>,
    Path(player): Path<String>,
) -> Result<Json<JsonValue>, AppError> {
    let jobs = controller.active_jobs(&player).await;
    let jobs: Vec<_> = jobs.iter().map(|j| j.as_ref()).collect();
    Ok(Json(serde_json::json!({
        "active": !jobs.is_empty(),
        "jobs": jobs,
    })))
}

/// GET /api/players/{player}/jobs/{job_id}
pub async fn job_status(
    Extension(controller): Extension<Controller>,
    Path((player, job_id)): Path<(String, String)>,
) -> Result<Json<JsonValue>, AppError> {
    let snapshot = controller.get_job_status(&player, &job_id).await?;
    Ok(Json(serde_json::json!(snapshot.as_ref())))
}

/// GET /api/players/{player}/jobs/{job_id}/events
/// Server-sent events following the job until it ends.
pub async fn job_events(
    Extension(controller): Extension<Controller>,
    Path((player, job_id)): Path<(String, String)>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = controller
        .stream_job_events(&player, &job_id)
        .map(|ev| {
            Ok(match Event::default().event(ev.name()).json_data(&ev) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not encode job event");
                    Event::default().event(ev.name()).data("{}")
                }
            })
        });
    Sse::new(events)
}
