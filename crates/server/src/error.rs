use analysis_worker::WorkerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<WorkerError> for AppError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::IllegalMove(_) => AppError::BadRequest(e.to_string()),
            WorkerError::GameNotFound(_)
            | WorkerError::PositionNotFound(_)
            | WorkerError::SessionNotFound(_)
            | WorkerError::JobNotFound(_)
            | WorkerError::PlayerNotFound(_) => AppError::NotFound(e.to_string()),
            WorkerError::AnalysisInProgress(_) => AppError::Conflict(e.to_string()),
            WorkerError::EngineUnavailable(_) => {
                AppError::Unavailable(format!("Analysis unavailable: {e}"))
            }
            WorkerError::Database(e) => AppError::Sqlx(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Sqlx(_) | AppError::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::BadRequest(msg) | AppError::NotFound(msg) | AppError::Conflict(msg) => {
                msg.clone()
            }
            AppError::Unavailable(msg) => {
                tracing::warn!("Service unavailable: {msg}");
                msg.clone()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                msg.clone()
            }
            AppError::Sqlx(e) => {
                tracing::error!("Database error: {e}");
                "Database error".to_string()
            }
            AppError::Anyhow(e) => {
                tracing::error!("Unexpected error: {e}");
                "Internal server error".to_string()
            }
        };

        (status, Json(json!({ "detail": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_status() {
        let cases = [
            (WorkerError::IllegalMove("e2e5".into()), StatusCode::BAD_REQUEST),
            (WorkerError::GameNotFound(7), StatusCode::NOT_FOUND),
            (WorkerError::PositionNotFound(7), StatusCode::NOT_FOUND),
            (WorkerError::JobNotFound("x".into()), StatusCode::NOT_FOUND),
            (WorkerError::AnalysisInProgress(7), StatusCode::CONFLICT),
            (
                WorkerError::EngineUnavailable("exited".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (WorkerError::Engine("bad line".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_engine_unavailable_message() {
        let err = AppError::from(WorkerError::EngineUnavailable("no binary".into()));
        assert!(err.to_string().starts_with("Analysis unavailable:"));
    }

    #[test]
    fn test_into_response_status() {
        let resp = AppError::NotFound("Game not found: 3".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
