pub mod channels;
pub mod publish;
pub mod tokens;
pub mod users;

use axum::{extract::State, Json};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Input validation
// ============================================================================

static UID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid uid regex"));
static CHANNEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid channel regex"));

pub(crate) fn parse_uid(raw: &str) -> Option<u32> {
    if !UID_RE.is_match(raw) {
        return None;
    }
    raw.parse().ok()
}

pub(crate) fn valid_channel(name: &str) -> bool {
    CHANNEL_RE.is_match(name)
}

// ============================================================================
// Reply helpers
// ============================================================================

// Admin validation and not-found failures are part of the control-plane
// contract: HTTP 200 with a {"status":"failed"} body, never a 4xx.

pub(crate) fn ok() -> Json<Value> {
    Json(json!({ "status": "success" }))
}

pub(crate) fn failed(error: &str) -> Json<Value> {
    Json(json!({ "status": "failed", "error": error }))
}

/// Fallback for unknown admin paths.
pub async fn not_found() -> AppError {
    AppError::NotFound
}

// ============================================================================
// Handlers
// ============================================================================

/// GET health/check — live counts plus a content-token drain snapshot.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let mut body = state.sessions.health_snapshot().await;
    if let Some(map) = body.as_object_mut() {
        map.insert("status".into(), json!("success"));
        map.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
        map.insert("startedAt".into(), json!(state.started_at.to_rfc3339()));
        map.insert(
            "uptimeSeconds".into(),
            json!((chrono::Utc::now() - state.started_at).num_seconds()),
        );
        map.insert("debug".into(), json!(state.debug.is_enabled()));
    }
    Json(body)
}

/// POST debug/toggle — mutate the live log level. A body carrying `debug`
/// sets the state explicitly; otherwise the flag flips.
pub async fn toggle_debug(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let requested = body
        .as_ref()
        .and_then(|Json(v)| v.get("debug"))
        .and_then(Value::as_bool);
    let debug_enabled = match requested {
        Some(enabled) => state.debug.set(enabled),
        None => state.debug.flip(),
    };
    tracing::info!(debug = debug_enabled, "debug logging toggled");
    Json(json!({ "status": "success", "debug": debug_enabled }))
}
