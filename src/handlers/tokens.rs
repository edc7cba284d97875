use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{failed, ok, valid_channel};
use crate::models::ContentTokenPayload;
use crate::state::AppState;

/// POST content/token — queue a one-use token for a token channel. The whole
/// body is retained as the token's payload.
pub async fn set_content_token(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let Some(channel) = body.get("channel").and_then(Value::as_str) else {
        return failed("Missing channel.");
    };
    let Some(token) = body.get("token").and_then(Value::as_str) else {
        return failed("Missing token.");
    };
    if !valid_channel(channel) {
        return failed("Invalid channel name.");
    }

    let payload: ContentTokenPayload = match serde_json::from_value(body.clone()) {
        Ok(payload) => payload,
        Err(_) => return failed("Invalid token payload."),
    };

    state
        .sessions
        .set_content_token(channel, token, payload)
        .await;
    ok()
}

/// POST content/token/users — who redeemed into a token channel: uids for
/// identified users, auth tokens for anonymous ones.
pub async fn content_token_users(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let Some(channel) = body.get("channel").and_then(Value::as_str) else {
        return failed("Missing channel.");
    };
    let (uids, auth_tokens) = state.sessions.content_token_users(channel).await;
    Json(json!({ "uids": uids, "authTokens": auth_tokens }))
}
