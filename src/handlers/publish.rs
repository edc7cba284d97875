use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{failed, valid_channel};
use crate::events::Event;
use crate::state::AppState;

/// POST publish — deliver a message to every authenticated socket (broadcast
/// flag) or to the members of `message.channel`.
pub async fn publish(State(state): State<AppState>, Json(message): Json<Value>) -> Json<Value> {
    let broadcast = matches!(message.get("broadcast"), Some(Value::Bool(true)))
        || message.get("broadcast").and_then(Value::as_u64) == Some(1);

    if broadcast {
        let sent = state.sessions.broadcast(&message).await;
        state
            .sessions
            .bus()
            .emit(&Event::MessagePublished { message });
        return Json(json!({ "status": "success", "sent": sent }));
    }

    let Some(channel) = message.get("channel").and_then(Value::as_str) else {
        return failed("Message requires a channel or the broadcast flag.");
    };
    if !valid_channel(channel) {
        return failed("Invalid channel name.");
    }

    match state.sessions.publish_to_channel(&message).await {
        Some(sent) => {
            state
                .sessions
                .bus()
                .emit(&Event::MessagePublished { message });
            Json(json!({ "status": "success", "sent": sent }))
        }
        None => failed("Channel does not exist."),
    }
}

/// POST content/token/message — fan a message out to the sockets of a token
/// channel.
pub async fn publish_to_content_channel(
    State(state): State<AppState>,
    Json(message): Json<Value>,
) -> Json<Value> {
    let Some(channel) = message.get("channel").and_then(Value::as_str) else {
        return failed("Missing channel.");
    };

    match state
        .sessions
        .publish_to_token_channel(channel, &message)
        .await
    {
        Some(sent) => {
            state
                .sessions
                .bus()
                .emit(&Event::MessagePublished { message });
            Json(json!({ "status": "success", "sent": sent }))
        }
        None => failed("Content channel does not exist."),
    }
}
