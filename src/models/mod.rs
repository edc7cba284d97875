use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

// ============================================================================
// Auth identity
// ============================================================================

/// What the backend returned for an auth token.
///
/// Backend replies are schemaless JSON: the fields the gateway acts on are
/// typed, everything else round-trips through the flattened `attachments` map
/// so extensions see the payload unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthIdentity {
    /// Primary key. Some backends omit it from the reply and rely on the
    /// token the client presented; the session manager fills it in then.
    #[serde(default)]
    pub auth_token: String,

    /// Numeric user id; 0 means anonymous.
    #[serde(default)]
    pub uid: u32,

    /// Channels the user may join, in backend order.
    #[serde(default)]
    pub channels: Vec<String>,

    #[serde(default)]
    pub nodejs_valid_auth_token: bool,

    /// Session id the backend correlated the authentication with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Uids whose sessions should be told about this user's presence changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_uids: Option<Vec<u32>>,

    /// Content tokens to redeem on connect: token channel name → token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_tokens: Option<HashMap<String, String>>,

    #[serde(flatten)]
    pub attachments: Map<String, Value>,
}

// ============================================================================
// Content token payloads
// ============================================================================

/// Admin-supplied metadata stored against a one-use content token and carried
/// over to the redeeming socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTokenPayload {
    /// When set, the disconnect of the redeeming socket is announced to the
    /// rest of the token channel (after the grace period).
    #[serde(default)]
    pub notify_on_disconnect: bool,

    #[serde(flatten)]
    pub attachments: Map<String, Value>,
}

// ============================================================================
// Client → server frames
// ============================================================================

/// Envelope for frames received on a client socket, discriminated by `event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientFrame {
    Authenticate(AuthenticateRequest),
    JoinTokenChannel(JoinTokenChannelRequest),
    Message(ClientMessage),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    pub auth_token: String,

    #[serde(default)]
    pub content_tokens: Option<HashMap<String, String>>,

    /// Correlation id for the client's ack callback, if it wants one.
    #[serde(default)]
    pub ack_id: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthenticateRequest {
    /// The message POSTed to the backend: the client's fields plus the
    /// routing fields `messageType` and `clientId`.
    pub fn to_backend_message(&self, session_id: &str) -> Value {
        let mut message = self.extra.clone();
        message.insert("authToken".into(), Value::String(self.auth_token.clone()));
        if let Some(tokens) = &self.content_tokens {
            message.insert("contentTokens".into(), json!(tokens));
        }
        message.insert("messageType".into(), json!("authenticate"));
        message.insert("clientId".into(), json!(session_id));
        Value::Object(message)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTokenChannelRequest {
    #[serde(default)]
    pub channel: Option<String>,

    #[serde(default)]
    pub content_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub channel: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientMessage {
    pub fn to_value(&self) -> Value {
        let mut message = self.extra.clone();
        message.insert("type".into(), Value::String(self.kind.clone()));
        if let Some(channel) = &self.channel {
            message.insert("channel".into(), Value::String(channel.clone()));
        }
        Value::Object(message)
    }
}

// ============================================================================
// Server → client payloads
// ============================================================================

pub const CALLBACK_CLIENT_AUTHENTICATED: &str = "clientAuthenticated";
pub const CALLBACK_CLIENT_JOINED_TOKEN_CHANNEL: &str = "clientJoinedTokenChannel";

pub fn client_authenticated(identity: &AuthIdentity) -> Value {
    json!({ "callback": CALLBACK_CLIENT_AUTHENTICATED, "data": identity })
}

pub fn client_joined_token_channel(payload: &ContentTokenPayload) -> Value {
    json!({ "callback": CALLBACK_CLIENT_JOINED_TOKEN_CHANNEL, "data": payload })
}

pub fn presence_notification(uid: u32, event: &str) -> Value {
    json!({ "presenceNotification": { "uid": uid, "event": event } })
}

pub fn content_channel_disconnect(channel: &str, uid: u32) -> Value {
    json!({
        "channel": channel,
        "contentChannelNotification": true,
        "data": { "uid": uid, "type": "disconnect" },
    })
}

pub fn ack(ack_id: u64) -> Value {
    json!({ "ackId": ack_id, "result": "success" })
}
