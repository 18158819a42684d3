use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no couriers available")]
    NoAvailableCouriers,

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl AppError {
    /// Only infrastructure failures are worth trying again; everything else is
    /// a property of the input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Infrastructure(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::NoAvailableCouriers => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no couriers available".to_string(),
            ),
            AppError::Infrastructure(msg) => {
                tracing::error!(error = %msg, "infrastructure failure surfaced to client");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Infrastructure(format!("http request failed: {err}"))
    }
}
