use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::state::AppState;

/// Header the backend must send on every admin request.
pub const SERVICE_KEY_HEADER: &str = "NodejsServiceKey";

/// Middleware gating the whole admin router, including its 404 fallback, on
/// the shared service key. The comparison is constant-time.
pub async fn require_service_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(SERVICE_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if state.backend.check_service_key(presented) {
        next.run(request).await
    } else {
        tracing::info!(
            path = %request.uri().path(),
            "admin request rejected: invalid service key"
        );
        AppError::InvalidServiceKey.into_response()
    }
}
