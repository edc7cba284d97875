use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use super::{failed, ok, parse_uid, valid_channel};
use crate::state::AppState;

/// POST user/kick/:uid — purge the user's identities and close its sockets.
pub async fn kick_user(State(state): State<AppState>, Path(uid): Path<String>) -> Json<Value> {
    let Some(uid) = parse_uid(&uid) else {
        return failed("Invalid uid.");
    };
    state.sessions.kick_user(uid).await;
    ok()
}

/// POST user/logout/:authtoken — delete one identity and disconnect the
/// sockets using it.
pub async fn logout_user(
    State(state): State<AppState>,
    Path(auth_token): Path<String>,
) -> Json<Value> {
    state.sessions.logout_user(&auth_token).await;
    ok()
}

/// POST user/channel/add/:channel/:uid
pub async fn add_user_to_channel(
    State(state): State<AppState>,
    Path((channel, uid)): Path<(String, String)>,
) -> Json<Value> {
    if !valid_channel(&channel) {
        return failed("Invalid channel name.");
    }
    let Some(uid) = parse_uid(&uid) else {
        return failed("Invalid uid.");
    };
    if state.sessions.add_user_to_channel(&channel, uid).await {
        ok()
    } else {
        failed("No active sessions for uid.")
    }
}

/// POST user/channel/remove/:channel/:uid
pub async fn remove_user_from_channel(
    State(state): State<AppState>,
    Path((channel, uid)): Path<(String, String)>,
) -> Json<Value> {
    if !valid_channel(&channel) {
        return failed("Invalid channel name.");
    }
    let Some(uid) = parse_uid(&uid) else {
        return failed("Invalid uid.");
    };
    if state.sessions.remove_user_from_channel(&channel, uid).await {
        ok()
    } else {
        failed("Channel does not exist.")
    }
}

/// GET user/presence-list/:uid/:uidList — replace the observer list of an
/// online user. `uidList` is comma-separated.
pub async fn set_presence_list(
    State(state): State<AppState>,
    Path((uid, uid_list)): Path<(String, String)>,
) -> Json<Value> {
    let Some(uid) = parse_uid(&uid) else {
        return failed("Invalid uid.");
    };
    let mut observers = Vec::new();
    for entry in uid_list.split(',') {
        let Some(observer) = parse_uid(entry) else {
            return failed("Invalid uid in list.");
        };
        observers.push(observer);
    }
    if state.sessions.set_user_presence_list(uid, observers).await {
        ok()
    } else {
        failed("User is not online.")
    }
}
