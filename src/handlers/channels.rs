use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use super::{failed, ok, valid_channel};
use crate::state::AppState;

/// POST channel/add/:channel
pub async fn add_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Json<Value> {
    if !valid_channel(&channel) {
        return failed("Invalid channel name.");
    }
    if state.sessions.add_channel(&channel).await {
        ok()
    } else {
        failed("Channel already exists.")
    }
}

/// GET channel/check/:channel
pub async fn check_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Json<Value> {
    if !valid_channel(&channel) {
        return failed("Invalid channel name.");
    }
    let exists = state.sessions.check_channel(&channel).await;
    Json(json!({ "status": "success", "result": exists }))
}

/// POST channel/remove/:channel
pub async fn remove_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Json<Value> {
    if !valid_channel(&channel) {
        return failed("Invalid channel name.");
    }
    if state.sessions.remove_channel(&channel).await {
        ok()
    } else {
        failed("Channel does not exist.")
    }
}

/// POST authtoken/channel/add/:channel/:authToken
pub async fn add_auth_token_to_channel(
    State(state): State<AppState>,
    Path((channel, auth_token)): Path<(String, String)>,
) -> Json<Value> {
    if !valid_channel(&channel) {
        return failed("Invalid channel name.");
    }
    if state
        .sessions
        .add_auth_token_to_channel(&channel, &auth_token)
        .await
    {
        ok()
    } else {
        failed("No active sessions for authToken.")
    }
}

/// POST authtoken/channel/remove/:channel/:authToken
pub async fn remove_auth_token_from_channel(
    State(state): State<AppState>,
    Path((channel, auth_token)): Path<(String, String)>,
) -> Json<Value> {
    if !valid_channel(&channel) {
        return failed("Invalid channel name.");
    }
    if state
        .sessions
        .remove_auth_token_from_channel(&channel, &auth_token)
        .await
    {
        ok()
    } else {
        failed("Channel does not exist.")
    }
}
