pub mod client;

pub use client::ClientHandle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::backend::BackendClient;
use crate::config::Config;
use crate::events::{Event, EventBus};
use crate::models::{
    self, AuthIdentity, AuthenticateRequest, ClientMessage, ContentTokenPayload,
    JoinTokenChannelRequest,
};
use crate::store::Store;

/// Knobs the session manager reads at runtime.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub clients_can_write_to_clients: bool,
    pub clients_can_write_to_channels: bool,
    /// Delay before offline/disconnect notifications fire, absorbing the
    /// disconnect-then-reconnect of a browser refresh.
    pub grace_period: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            clients_can_write_to_clients: config.clients_can_write_to_clients,
            clients_can_write_to_channels: config.clients_can_write_to_channels,
            grace_period: Duration::from_millis(config.grace_period_ms),
        }
    }
}

struct SessionInner {
    store: Mutex<Store>,
    backend: BackendClient,
    bus: EventBus,
    settings: SessionSettings,
}

/// Socket lifecycle and fan-out engine.
///
/// All state lives in one [`Store`] behind one async mutex — every socket
/// event, timer firing, and admin call mutates inside that single serial
/// region, so no handler ever observes the maps mid-update. The two
/// suspension points (the backend authentication POST and the grace timers)
/// run with the lock released.
///
/// Cheaply cloneable — all clones share the same state via `Arc`.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

enum MessageRoute {
    Channel,
    Clients,
}

impl SessionManager {
    pub fn new(backend: BackendClient, bus: EventBus, settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                store: Mutex::new(Store::new()),
                backend,
                bus,
                settings,
            }),
        }
    }

    /// The bus extensions subscribe on at startup.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    // ========================================================================
    // Socket lifecycle
    // ========================================================================

    /// Register a freshly connected socket, pending authentication.
    pub async fn connect(&self, handle: Arc<dyn ClientHandle>) {
        let session_id = handle.id().to_owned();
        {
            let mut store = self.inner.store.lock().await;
            store.insert_pre_auth(handle);
        }
        tracing::debug!(%session_id, "client connected");
        self.inner.bus.emit(&Event::ClientConnection { session_id });
    }

    /// Authenticate a pending socket.
    ///
    /// A cached identity for the presented token short-circuits the backend
    /// round-trip, making browser refreshes cheap. Otherwise the request is
    /// forwarded to the backend; while it is in flight the store lock is
    /// released, so other sockets keep being serviced and this socket may
    /// still disconnect (setup then aborts).
    pub async fn authenticate(&self, session_id: &str, request: AuthenticateRequest) {
        let cached = {
            let store = self.inner.store.lock().await;
            store.identity(&request.auth_token)
        };
        if let Some(identity) = cached {
            self.setup_connection(session_id, &identity, request.content_tokens.as_ref())
                .await;
            self.send_ack(session_id, request.ack_id).await;
            return;
        }

        let message = request.to_backend_message(session_id);
        let body = match self.inner.backend.send(&message).await {
            Ok((status, body)) if status.is_success() => body,
            Ok((status, _)) => {
                tracing::info!(session_id, status = %status, "backend rejected authentication");
                self.drop_unauthenticated(session_id).await;
                return;
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "backend authentication request failed");
                self.drop_unauthenticated(session_id).await;
                return;
            }
        };

        if body.get("error").is_some() {
            tracing::info!(session_id, error = %body["error"], "backend returned an authentication error");
            self.drop_unauthenticated(session_id).await;
            return;
        }

        let mut identity: AuthIdentity = match serde_json::from_value(body) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "malformed backend authentication reply");
                self.drop_unauthenticated(session_id).await;
                return;
            }
        };
        if !identity.nodejs_valid_auth_token {
            tracing::info!(session_id, "backend declared the auth token invalid");
            self.drop_unauthenticated(session_id).await;
            return;
        }

        // Backends may omit the token from the echo; the identity is keyed by
        // the token the client presented then.
        if identity.auth_token.is_empty() {
            identity.auth_token = request.auth_token.clone();
        }
        let target = identity
            .client_id
            .clone()
            .unwrap_or_else(|| session_id.to_owned());
        let content_tokens = identity.content_tokens.clone();

        self.setup_connection(&target, &identity, content_tokens.as_ref())
            .await;
        self.send_ack(&target, request.ack_id).await;
    }

    async fn setup_connection(
        &self,
        session_id: &str,
        identity: &AuthIdentity,
        content_tokens: Option<&HashMap<String, String>>,
    ) {
        let (handle, presence) = {
            let mut store = self.inner.store.lock().await;

            // The identity survives even if the socket vanished mid-auth, so
            // the next connection with this token skips the backend.
            store.cache_identity(identity.clone());

            if !store.is_pre_auth(session_id) {
                tracing::debug!(session_id, "socket vanished before authentication completed");
                return;
            }
            store.promote(session_id, &identity.auth_token, identity.uid);

            for channel in &identity.channels {
                store.add_member(channel, session_id);
            }

            let mut presence = Vec::new();
            if identity.uid > 0 {
                // A reconnect inside the grace window must not fire the
                // pending offline notification.
                if let Some(timer) = store.take_presence_timer(identity.uid) {
                    timer.abort();
                }
                if !store.is_online(identity.uid) {
                    store.mark_online(
                        identity.uid,
                        identity.presence_uids.clone().unwrap_or_default(),
                    );
                    self.notify_backend_presence(identity.uid, "userOnline");
                    presence = presence_targets(&store, identity.uid, "online");
                }
            }

            if let Some(tokens) = content_tokens {
                for (channel, token) in tokens {
                    if store.redeem_token(channel, token, session_id).is_some() {
                        if let Some(timer) = store.take_token_timer(channel, identity.uid) {
                            timer.abort();
                        }
                    }
                }
            }

            (store.handle_of(session_id), presence)
        };

        for (target, payload) in presence {
            target.send_json(&payload);
        }

        self.inner.bus.emit(&Event::ClientAuthenticated {
            session_id: session_id.to_owned(),
            identity: identity.clone(),
        });

        if let Some(handle) = handle {
            handle.send_json(&models::client_authenticated(identity));
        }
        tracing::info!(session_id, uid = identity.uid, "client authenticated");
    }

    /// Redeem a content token on an already-authenticated socket and announce
    /// the join to the rest of the token channel.
    pub async fn join_token_channel(&self, session_id: &str, request: JoinTokenChannelRequest) {
        let (Some(channel), Some(token)) = (request.channel, request.content_token) else {
            return;
        };

        let targets = {
            let mut store = self.inner.store.lock().await;
            let Some(socket) = store.socket(session_id) else {
                return;
            };
            store.ensure_token_channel(&channel);
            let Some(payload) = store.redeem_token(&channel, &token, session_id) else {
                tracing::debug!(session_id, %channel, "content token not queued; join ignored");
                return;
            };
            if let Some(timer) = store.take_token_timer(&channel, socket.uid) {
                timer.abort();
            }

            let message = models::client_joined_token_channel(&payload);
            store
                .token_channel_handles(&channel)
                .into_iter()
                .map(|handle| (handle, message.clone()))
                .collect::<Vec<_>>()
        };

        for (handle, message) in targets {
            handle.send_json(&message);
        }
    }

    /// Route an inbound client message, enforcing write authorization.
    /// Unauthorized attempts are logged and silently dropped.
    pub async fn process_message(&self, session_id: &str, message: ClientMessage) {
        let route = {
            let store = self.inner.store.lock().await;
            if !store.is_authenticated(session_id) {
                tracing::debug!(session_id, "message from unauthenticated socket dropped");
                return;
            }
            match &message.channel {
                Some(channel) => {
                    let writable = self.inner.settings.clients_can_write_to_channels
                        || store.channel_writable(channel);
                    if writable && store.is_member(channel, session_id) {
                        MessageRoute::Channel
                    } else {
                        tracing::info!(
                            session_id,
                            %channel,
                            "unauthorized channel message dropped"
                        );
                        return;
                    }
                }
                None => {
                    if self.inner.settings.clients_can_write_to_clients {
                        MessageRoute::Clients
                    } else {
                        tracing::info!(session_id, "client-to-client messaging disabled; dropped");
                        return;
                    }
                }
            }
        };

        let event = match route {
            MessageRoute::Channel => Event::ClientToChannelMessage {
                session_id: session_id.to_owned(),
                message: message.to_value(),
            },
            MessageRoute::Clients => Event::ClientToClientMessage {
                session_id: session_id.to_owned(),
                message: message.to_value(),
            },
        };
        self.inner.bus.emit(&event);
    }

    /// Transport-driven disconnect: emits the lifecycle event, then runs the
    /// state cleanup.
    pub async fn disconnect(&self, session_id: &str) {
        self.inner.bus.emit(&Event::ClientDisconnect {
            session_id: session_id.to_owned(),
        });
        self.cleanup(session_id).await;
    }

    /// Remove a socket from the directory, arming the grace timers.
    ///
    /// Idempotent: sessions already cleaned up (admin kick/logout races the
    /// transport's own disconnect) fall through without effect.
    async fn cleanup(&self, session_id: &str) {
        let mut store = self.inner.store.lock().await;

        if store.take_pre_auth(session_id).is_some() {
            return;
        }
        let Some(socket) = store.socket(session_id) else {
            return;
        };

        store.remove_session_from_channels(session_id);

        if socket.uid > 0 {
            let manager = self.clone();
            let uid = socket.uid;
            let grace = self.inner.settings.grace_period;
            let timer = tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                manager.expire_presence(uid).await;
            });
            store.arm_presence_timer(uid, timer);
        }

        for channel in store.token_channels_containing(session_id) {
            let payload = store.remove_token_socket(&channel, session_id);
            if payload.is_some_and(|p| p.notify_on_disconnect) {
                let manager = self.clone();
                let name = channel.clone();
                let uid = socket.uid;
                let grace = self.inner.settings.grace_period;
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    manager.expire_token_membership(name, uid).await;
                });
                store.arm_token_timer(channel, socket.uid, timer);
            }
        }

        let _ = store.remove_socket(session_id);
        tracing::debug!(session_id, uid = socket.uid, "client disconnected");
    }

    /// Presence grace timer fired: if the uid still has no sockets, it goes
    /// offline — backend callback plus notification to its observers.
    async fn expire_presence(&self, uid: u32) {
        let targets = {
            let mut store = self.inner.store.lock().await;
            let _ = store.take_presence_timer(uid);
            if store.uid_has_sessions(uid) || !store.is_online(uid) {
                return;
            }
            let targets = presence_targets(&store, uid, "offline");
            store.mark_offline(uid);
            targets
        };

        let message = json!({ "uid": uid, "messageType": "userOffline" });
        if let Err(e) = self.inner.backend.send(&message).await {
            tracing::warn!(uid, error = %e, "backend userOffline notification failed");
        }
        for (handle, payload) in targets {
            handle.send_json(&payload);
        }
        tracing::debug!(uid, "user went offline");
    }

    /// Token-channel grace timer fired: announce the departure to the
    /// remaining members unless a session of that uid reappeared.
    async fn expire_token_membership(&self, channel: String, uid: u32) {
        let targets = {
            let mut store = self.inner.store.lock().await;
            let _ = store.take_token_timer(&channel, uid);
            if store.token_channel_has_uid(&channel, uid) {
                return;
            }
            let payload = models::content_channel_disconnect(&channel, uid);
            store
                .token_channel_handles(&channel)
                .into_iter()
                .map(|handle| (handle, payload.clone()))
                .collect::<Vec<_>>()
        };

        for (handle, payload) in targets {
            handle.send_json(&payload);
        }
    }

    // ========================================================================
    // Fan-out primitives
    // ========================================================================

    /// Deliver to a single session. Returns `false` when it is not connected.
    pub async fn publish_to_client(&self, session_id: &str, message: &Value) -> bool {
        let handle = {
            let store = self.inner.store.lock().await;
            store.handle_of(session_id)
        };
        match handle {
            Some(handle) => handle.send_json(message),
            None => {
                tracing::debug!(session_id, "publish to unknown session");
                false
            }
        }
    }

    /// Deliver to every member of `message.channel`. `None` when the message
    /// names no channel or the channel does not exist.
    pub async fn publish_to_channel(&self, message: &Value) -> Option<usize> {
        let channel = message.get("channel").and_then(Value::as_str)?;
        let handles = {
            let store = self.inner.store.lock().await;
            if !store.channel_exists(channel) {
                tracing::debug!(channel, "publish to unknown channel");
                return None;
            }
            store.channel_handles(channel)
        };
        Some(
            handles
                .into_iter()
                .filter(|handle| handle.send_json(message))
                .count(),
        )
    }

    /// Deliver to every socket that redeemed a token in the named channel.
    pub async fn publish_to_token_channel(&self, channel: &str, message: &Value) -> Option<usize> {
        let handles = {
            let store = self.inner.store.lock().await;
            if !store.token_channel_exists(channel) {
                return None;
            }
            store.token_channel_handles(channel)
        };
        Some(
            handles
                .into_iter()
                .filter(|handle| handle.send_json(message))
                .count(),
        )
    }

    /// Deliver to every authenticated socket.
    pub async fn broadcast(&self, message: &Value) -> usize {
        let handles = {
            let store = self.inner.store.lock().await;
            store.all_handles()
        };
        handles
            .into_iter()
            .filter(|handle| handle.send_json(message))
            .count()
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Purge every identity with this uid and disconnect all its sockets.
    pub async fn kick_user(&self, uid: u32) {
        let (sessions, handles) = {
            let store = self.inner.store.lock().await;
            let sessions = store.sessions_for_uid(uid);
            let handles: Vec<_> = sessions
                .iter()
                .filter_map(|id| store.handle_of(id))
                .collect();
            (sessions, handles)
        };

        // Close the transports first; the cleanup below is idempotent with
        // the disconnect the transport will deliver for the closed sockets.
        for handle in handles {
            handle.close();
        }
        for session_id in &sessions {
            self.cleanup(session_id).await;
        }

        let mut store = self.inner.store.lock().await;
        for token in store.identities_with_uid(uid) {
            store.remove_identity(&token);
        }
        tracing::info!(uid, sessions = sessions.len(), "user kicked");
    }

    /// Delete one identity and disconnect the sockets using it.
    pub async fn logout_user(&self, auth_token: &str) {
        let (sessions, handles) = {
            let store = self.inner.store.lock().await;
            let sessions = store.sessions_for_token(auth_token);
            let handles: Vec<_> = sessions
                .iter()
                .filter_map(|id| store.handle_of(id))
                .collect();
            (sessions, handles)
        };

        for handle in handles {
            handle.close();
        }
        for session_id in &sessions {
            self.cleanup(session_id).await;
        }

        let mut store = self.inner.store.lock().await;
        store.remove_identity(auth_token);
    }

    pub async fn add_channel(&self, name: &str) -> bool {
        let mut store = self.inner.store.lock().await;
        store.add_channel(name)
    }

    pub async fn check_channel(&self, name: &str) -> bool {
        let store = self.inner.store.lock().await;
        store.channel_exists(name)
    }

    pub async fn remove_channel(&self, name: &str) -> bool {
        let mut store = self.inner.store.lock().await;
        store.remove_channel(name)
    }

    /// Mark a channel as writable by its members (extension hook).
    pub async fn set_channel_writable(&self, name: &str, writable: bool) -> bool {
        let mut store = self.inner.store.lock().await;
        store.set_channel_writable(name, writable)
    }

    /// Join every active session of `uid` to the channel and record it on the
    /// matching identities. Fails when the uid has no active session; the
    /// channel is not created then.
    pub async fn add_user_to_channel(&self, channel: &str, uid: u32) -> bool {
        let mut store = self.inner.store.lock().await;
        let sessions = store.sessions_for_uid(uid);
        if sessions.is_empty() {
            return false;
        }
        for session_id in &sessions {
            store.add_member(channel, session_id);
        }
        for token in store.identities_with_uid(uid) {
            store.add_channel_to_identity(&token, channel);
        }
        true
    }

    /// Reverse of [`add_user_to_channel`]. Succeeds iff the channel existed.
    pub async fn remove_user_from_channel(&self, channel: &str, uid: u32) -> bool {
        let mut store = self.inner.store.lock().await;
        if !store.channel_exists(channel) {
            return false;
        }
        for session_id in store.sessions_for_uid(uid) {
            store.remove_member(channel, &session_id);
        }
        for token in store.identities_with_uid(uid) {
            store.remove_channel_from_identity(&token, channel);
        }
        true
    }

    /// Like [`add_user_to_channel`] but keyed by auth token.
    pub async fn add_auth_token_to_channel(&self, channel: &str, auth_token: &str) -> bool {
        let mut store = self.inner.store.lock().await;
        let sessions = store.sessions_for_token(auth_token);
        if sessions.is_empty() {
            return false;
        }
        for session_id in &sessions {
            store.add_member(channel, session_id);
        }
        store.add_channel_to_identity(auth_token, channel);
        true
    }

    pub async fn remove_auth_token_from_channel(&self, channel: &str, auth_token: &str) -> bool {
        let mut store = self.inner.store.lock().await;
        if !store.channel_exists(channel) {
            return false;
        }
        for session_id in store.sessions_for_token(auth_token) {
            store.remove_member(channel, &session_id);
        }
        store.remove_channel_from_identity(auth_token, channel);
        true
    }

    /// Replace the observer list of an online uid. `false` when offline.
    pub async fn set_user_presence_list(&self, uid: u32, observers: Vec<u32>) -> bool {
        let mut store = self.inner.store.lock().await;
        store.set_observers(uid, observers)
    }

    /// Queue a one-use content token.
    pub async fn set_content_token(&self, channel: &str, token: &str, payload: ContentTokenPayload) {
        let mut store = self.inner.store.lock().await;
        store.queue_token(channel, token, payload);
    }

    /// Who redeemed into a token channel: uids for identified users, auth
    /// tokens for anonymous ones.
    pub async fn content_token_users(&self, channel: &str) -> (Vec<u32>, Vec<String>) {
        let store = self.inner.store.lock().await;
        let mut uids = Vec::new();
        let mut tokens = Vec::new();
        for session_id in store.token_channel_sessions(channel) {
            if let Some(socket) = store.socket(&session_id) {
                if socket.uid > 0 {
                    uids.push(socket.uid);
                } else {
                    tokens.push(socket.auth_token);
                }
            }
        }
        (uids, tokens)
    }

    pub async fn health_snapshot(&self) -> Value {
        let store = self.inner.store.lock().await;
        json!({
            "sockets": store.socket_count(),
            "preAuthSockets": store.pre_auth_count(),
            "authIdentities": store.identity_count(),
            "onlineUsers": store.online_count(),
            "channels": store.channel_count(),
            "contentTokens": store.content_token_summary(),
        })
    }

    // ── Read-only projections (observability and tests) ──────────────────────

    pub async fn is_authenticated(&self, session_id: &str) -> bool {
        self.inner.store.lock().await.is_authenticated(session_id)
    }

    pub async fn is_online(&self, uid: u32) -> bool {
        self.inner.store.lock().await.is_online(uid)
    }

    pub async fn presence_timer_armed(&self, uid: u32) -> bool {
        self.inner.store.lock().await.presence_timer_armed(uid)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn send_ack(&self, session_id: &str, ack_id: Option<u64>) {
        let Some(ack_id) = ack_id else {
            return;
        };
        let handle = {
            let store = self.inner.store.lock().await;
            store.handle_of(session_id)
        };
        if let Some(handle) = handle {
            handle.send_json(&models::ack(ack_id));
        }
    }

    /// Failed authentication: drop the pending socket and close its transport.
    async fn drop_unauthenticated(&self, session_id: &str) {
        let handle = {
            let mut store = self.inner.store.lock().await;
            store.take_pre_auth(session_id)
        };
        if let Some(handle) = handle {
            handle.close();
        }
    }

    /// Fire-and-forget presence callback to the backend.
    fn notify_backend_presence(&self, uid: u32, message_type: &'static str) {
        let backend = self.inner.backend.clone();
        let message = json!({ "uid": uid, "messageType": message_type });
        tokio::spawn(async move {
            if let Err(e) = backend.send(&message).await {
                tracing::warn!(uid, message_type, error = %e, "backend presence notification failed");
            }
        });
    }

    #[cfg(test)]
    pub(crate) async fn seed_identity(&self, identity: AuthIdentity) {
        let mut store = self.inner.store.lock().await;
        store.cache_identity(identity);
    }
}

/// Handles and payloads for a presence change: one notification per active
/// session of every observer of `uid`.
fn presence_targets(
    store: &Store,
    uid: u32,
    event: &str,
) -> Vec<(Arc<dyn ClientHandle>, Value)> {
    let payload = models::presence_notification(uid, event);
    let mut targets = Vec::new();
    for observer in store.observers(uid) {
        for session_id in store.sessions_for_uid(observer) {
            if let Some(handle) = store.handle_of(&session_id) {
                targets.push((handle, payload.clone()));
            }
        }
    }
    targets
}
