//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::orchestrator::RunError;
use crate::projects::validate::ValidationError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error("project '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Run(run) => match run {
                RunError::ProjectNotFound { .. } => StatusCode::NOT_FOUND,
                RunError::NotRunnable { .. } | RunError::AlreadyRunning { .. } => {
                    StatusCode::CONFLICT
                }
                RunError::InvalidReport => StatusCode::BAD_REQUEST,
                RunError::Spawn { .. } | RunError::History { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = json!({
            "error": {
                "status": status.as_u16(),
                "message": self.to_string(),
            },
            "meta": {
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(ValidationError::Empty { field: "grep" }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(RunError::AlreadyRunning {
                project_id: "x".into()
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(anyhow::anyhow!("disk gone")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
