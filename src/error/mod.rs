use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that surface as HTTP responses.
///
/// Admin-plane *validation* failures are not errors in this sense — per the
/// control-plane contract they are ordinary HTTP 200 replies with
/// `{"status":"failed", "error": …}` bodies, built directly in the handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid service key.")]
    InvalidServiceKey,

    #[error("Not Found.")]
    NotFound,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::InvalidServiceKey => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid service key." })),
            )
                .into_response(),
            // The admin contract fixes the 404 body as plain text.
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not Found.").into_response(),
        }
    }
}
