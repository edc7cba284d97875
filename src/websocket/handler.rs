use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::ClientFrame;
use crate::session::{ClientHandle, SessionManager};
use crate::state::AppState;

/// Outbound instructions for the socket's send pump.
enum Outbound {
    Frame(String),
    Close,
}

/// Transport adapter: the live-connection implementation of [`ClientHandle`].
///
/// Outbound delivery goes through an unbounded mpsc channel so `send_json`
/// never blocks the caller; delivery is best-effort fire-and-forget.
pub struct WsClient {
    id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientHandle for WsClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn send_json(&self, value: &Value) -> bool {
        self.tx.send(Outbound::Frame(value.to_string())).is_ok()
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// GET /ws — upgrade to a WebSocket connection.
///
/// No credentials are required for the upgrade itself: the socket sits in the
/// pre-auth set until it authenticates against the backend, and can do
/// nothing else before that.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let session_id = Uuid::new_v4().to_string();
    let client = Arc::new(WsClient {
        id: session_id.clone(),
        tx,
    });
    state.sessions.connect(client).await;

    // Pump queued payloads out to the WebSocket until the channel closes or
    // the session manager asks for a close.
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Inbound frames are dispatched sequentially, preserving the transport's
    // delivery order for this socket.
    let sessions = state.sessions.clone();
    let recv_session_id = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    dispatch_frame(&sessions, &recv_session_id, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Axum answers Ping frames transparently.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(
                        session_id = %recv_session_id,
                        error = ?e,
                        "WebSocket receive error; closing connection"
                    );
                    break;
                }
            }
        }
    });

    // Wait for either task to finish — then abort the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.sessions.disconnect(&session_id).await;
}

async fn dispatch_frame(sessions: &SessionManager, session_id: &str, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            // Don't disconnect over bad JSON; just drop the frame.
            tracing::debug!(session_id, error = %e, "unparseable client frame dropped");
            return;
        }
    };

    match frame {
        ClientFrame::Authenticate(request) => sessions.authenticate(session_id, request).await,
        ClientFrame::JoinTokenChannel(request) => {
            sessions.join_token_channel(session_id, request).await
        }
        ClientFrame::Message(message) => sessions.process_message(session_id, message).await,
    }
}
