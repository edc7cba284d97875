use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::models::{AuthIdentity, ContentTokenPayload};
use crate::session::ClientHandle;

/// A socket that completed authentication.
#[derive(Clone)]
pub struct AuthenticatedSocket {
    pub handle: Arc<dyn ClientHandle>,
    pub auth_token: String,
    pub uid: u32,
}

struct Channel {
    session_ids: HashSet<String>,
    client_writable: bool,
}

impl Channel {
    fn new() -> Self {
        Self {
            session_ids: HashSet::new(),
            client_writable: false,
        }
    }
}

#[derive(Default)]
struct TokenChannel {
    /// Unredeemed one-use tokens.
    tokens: HashMap<String, ContentTokenPayload>,
    /// Sockets that redeemed a token, with the token's payload.
    sockets: HashMap<String, ContentTokenPayload>,
}

/// The gateway's in-memory directory: sockets, identities, channels, token
/// channels, presence, and the armed grace timers.
///
/// All mutation goes through invariant-preserving methods; queries return
/// owned projections, never interior references. The session manager guards
/// the whole store behind a single async mutex, so these methods are plain
/// synchronous code.
#[derive(Default)]
pub struct Store {
    pre_auth: HashMap<String, Arc<dyn ClientHandle>>,
    sockets: HashMap<String, AuthenticatedSocket>,
    identities: HashMap<String, AuthIdentity>,
    channels: HashMap<String, Channel>,
    token_channels: HashMap<String, TokenChannel>,
    /// uid → uids observing this user's presence changes. A uid is a key iff
    /// it has an authenticated socket or a presence grace timer armed.
    online_users: HashMap<u32, Vec<u32>>,
    presence_timers: HashMap<u32, JoinHandle<()>>,
    token_timers: HashMap<(String, u32), JoinHandle<()>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Socket lifecycle ─────────────────────────────────────────────────────

    pub fn insert_pre_auth(&mut self, handle: Arc<dyn ClientHandle>) {
        self.pre_auth.insert(handle.id().to_owned(), handle);
    }

    pub fn is_pre_auth(&self, session_id: &str) -> bool {
        self.pre_auth.contains_key(session_id)
    }

    pub fn take_pre_auth(&mut self, session_id: &str) -> Option<Arc<dyn ClientHandle>> {
        self.pre_auth.remove(session_id)
    }

    /// Move a socket from `pre_auth` to `authenticated`, stamping its token
    /// and uid. Returns `false` when the socket is not pending.
    pub fn promote(&mut self, session_id: &str, auth_token: &str, uid: u32) -> bool {
        let Some(handle) = self.pre_auth.remove(session_id) else {
            return false;
        };
        self.sockets.insert(
            session_id.to_owned(),
            AuthenticatedSocket {
                handle,
                auth_token: auth_token.to_owned(),
                uid,
            },
        );
        true
    }

    pub fn is_authenticated(&self, session_id: &str) -> bool {
        self.sockets.contains_key(session_id)
    }

    pub fn socket(&self, session_id: &str) -> Option<AuthenticatedSocket> {
        self.sockets.get(session_id).cloned()
    }

    pub fn handle_of(&self, session_id: &str) -> Option<Arc<dyn ClientHandle>> {
        self.sockets.get(session_id).map(|s| s.handle.clone())
    }

    pub fn all_handles(&self) -> Vec<Arc<dyn ClientHandle>> {
        self.sockets.values().map(|s| s.handle.clone()).collect()
    }

    /// Delete an authenticated socket. Also strips it from every channel and
    /// token channel so no member set can reference a dead session.
    pub fn remove_socket(&mut self, session_id: &str) -> Option<AuthenticatedSocket> {
        let socket = self.sockets.remove(session_id)?;
        self.remove_session_from_channels(session_id);
        for token_channel in self.token_channels.values_mut() {
            token_channel.sockets.remove(session_id);
        }
        Some(socket)
    }

    pub fn sessions_for_uid(&self, uid: u32) -> Vec<String> {
        self.sockets
            .iter()
            .filter(|(_, s)| s.uid == uid)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn sessions_for_token(&self, auth_token: &str) -> Vec<String> {
        self.sockets
            .iter()
            .filter(|(_, s)| s.auth_token == auth_token)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn uid_has_sessions(&self, uid: u32) -> bool {
        self.sockets.values().any(|s| s.uid == uid)
    }

    // ── Auth identities ──────────────────────────────────────────────────────

    pub fn cache_identity(&mut self, identity: AuthIdentity) {
        self.identities.insert(identity.auth_token.clone(), identity);
    }

    pub fn identity(&self, auth_token: &str) -> Option<AuthIdentity> {
        self.identities.get(auth_token).cloned()
    }

    pub fn remove_identity(&mut self, auth_token: &str) -> Option<AuthIdentity> {
        self.identities.remove(auth_token)
    }

    /// Tokens of every identity whose uid equals `uid` (strict numeric
    /// comparison).
    pub fn identities_with_uid(&self, uid: u32) -> Vec<String> {
        self.identities
            .iter()
            .filter(|(_, identity)| identity.uid == uid)
            .map(|(token, _)| token.clone())
            .collect()
    }

    pub fn add_channel_to_identity(&mut self, auth_token: &str, channel: &str) {
        if let Some(identity) = self.identities.get_mut(auth_token) {
            if !identity.channels.iter().any(|c| c == channel) {
                identity.channels.push(channel.to_owned());
            }
        }
    }

    pub fn remove_channel_from_identity(&mut self, auth_token: &str, channel: &str) {
        if let Some(identity) = self.identities.get_mut(auth_token) {
            identity.channels.retain(|c| c != channel);
        }
    }

    // ── Channels ─────────────────────────────────────────────────────────────

    /// Create a channel. Returns `false` when it already exists.
    pub fn add_channel(&mut self, name: &str) -> bool {
        if self.channels.contains_key(name) {
            return false;
        }
        self.channels.insert(name.to_owned(), Channel::new());
        true
    }

    pub fn channel_exists(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn remove_channel(&mut self, name: &str) -> bool {
        self.channels.remove(name).is_some()
    }

    /// Add an authenticated session to a channel, creating the channel as a
    /// side effect. Unauthenticated sessions are refused — channel member
    /// sets only ever hold live authenticated sockets.
    pub fn add_member(&mut self, channel: &str, session_id: &str) -> bool {
        if !self.sockets.contains_key(session_id) {
            return false;
        }
        self.channels
            .entry(channel.to_owned())
            .or_insert_with(Channel::new)
            .session_ids
            .insert(session_id.to_owned());
        true
    }

    pub fn remove_member(&mut self, channel: &str, session_id: &str) -> bool {
        self.channels
            .get_mut(channel)
            .map(|c| c.session_ids.remove(session_id))
            .unwrap_or(false)
    }

    pub fn remove_session_from_channels(&mut self, session_id: &str) {
        for channel in self.channels.values_mut() {
            channel.session_ids.remove(session_id);
        }
    }

    pub fn is_member(&self, channel: &str, session_id: &str) -> bool {
        self.channels
            .get(channel)
            .map(|c| c.session_ids.contains(session_id))
            .unwrap_or(false)
    }

    pub fn channel_members(&self, channel: &str) -> Vec<String> {
        self.channels
            .get(channel)
            .map(|c| c.session_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn channel_handles(&self, channel: &str) -> Vec<Arc<dyn ClientHandle>> {
        self.channel_members(channel)
            .iter()
            .filter_map(|id| self.handle_of(id))
            .collect()
    }

    pub fn set_channel_writable(&mut self, channel: &str, writable: bool) -> bool {
        match self.channels.get_mut(channel) {
            Some(c) => {
                c.client_writable = writable;
                true
            }
            None => false,
        }
    }

    pub fn channel_writable(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .map(|c| c.client_writable)
            .unwrap_or(false)
    }

    // ── Token channels ───────────────────────────────────────────────────────

    pub fn ensure_token_channel(&mut self, name: &str) {
        self.token_channels.entry(name.to_owned()).or_default();
    }

    pub fn token_channel_exists(&self, name: &str) -> bool {
        self.token_channels.contains_key(name)
    }

    /// Queue a one-use token. A token lives in at most one token channel, so
    /// re-queuing under a different channel moves it.
    pub fn queue_token(&mut self, channel: &str, token: &str, payload: ContentTokenPayload) {
        for (name, token_channel) in self.token_channels.iter_mut() {
            if name != channel {
                token_channel.tokens.remove(token);
            }
        }
        self.token_channels
            .entry(channel.to_owned())
            .or_default()
            .tokens
            .insert(token.to_owned(), payload);
    }

    /// Redeem a queued token for an authenticated session: the payload moves
    /// from the token map to the socket map and the token entry is deleted.
    pub fn redeem_token(
        &mut self,
        channel: &str,
        token: &str,
        session_id: &str,
    ) -> Option<ContentTokenPayload> {
        if !self.sockets.contains_key(session_id) {
            return None;
        }
        let token_channel = self.token_channels.get_mut(channel)?;
        let payload = token_channel.tokens.remove(token)?;
        token_channel
            .sockets
            .insert(session_id.to_owned(), payload.clone());
        Some(payload)
    }

    pub fn token_channels_containing(&self, session_id: &str) -> Vec<String> {
        self.token_channels
            .iter()
            .filter(|(_, tc)| tc.sockets.contains_key(session_id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn remove_token_socket(
        &mut self,
        channel: &str,
        session_id: &str,
    ) -> Option<ContentTokenPayload> {
        self.token_channels
            .get_mut(channel)?
            .sockets
            .remove(session_id)
    }

    pub fn token_channel_sessions(&self, channel: &str) -> Vec<String> {
        self.token_channels
            .get(channel)
            .map(|tc| tc.sockets.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn token_channel_handles(&self, channel: &str) -> Vec<Arc<dyn ClientHandle>> {
        self.token_channel_sessions(channel)
            .iter()
            .filter_map(|id| self.handle_of(id))
            .collect()
    }

    /// Whether any session of `uid` currently sits in the token channel.
    pub fn token_channel_has_uid(&self, channel: &str, uid: u32) -> bool {
        self.token_channel_sessions(channel)
            .iter()
            .filter_map(|id| self.sockets.get(id))
            .any(|s| s.uid == uid)
    }

    /// Per-channel counts for the health report. Token values themselves are
    /// one-use secrets and stay out of it.
    pub fn content_token_summary(&self) -> Value {
        let mut summary = serde_json::Map::new();
        for (name, token_channel) in &self.token_channels {
            summary.insert(
                name.clone(),
                json!({
                    "queuedTokens": token_channel.tokens.len(),
                    "activeSockets": token_channel.sockets.len(),
                }),
            );
        }
        Value::Object(summary)
    }

    // ── Presence ─────────────────────────────────────────────────────────────

    /// Mark a uid online with its observer list. Returns `false` when it was
    /// already online (the list is left untouched then).
    pub fn mark_online(&mut self, uid: u32, observers: Vec<u32>) -> bool {
        if self.online_users.contains_key(&uid) {
            return false;
        }
        self.online_users.insert(uid, observers);
        true
    }

    pub fn mark_offline(&mut self, uid: u32) -> bool {
        self.online_users.remove(&uid).is_some()
    }

    pub fn is_online(&self, uid: u32) -> bool {
        self.online_users.contains_key(&uid)
    }

    pub fn observers(&self, uid: u32) -> Vec<u32> {
        self.online_users.get(&uid).cloned().unwrap_or_default()
    }

    /// Replace the observer list of an online uid. Offline uids are refused —
    /// inserting them here would fake them online.
    pub fn set_observers(&mut self, uid: u32, observers: Vec<u32>) -> bool {
        match self.online_users.get_mut(&uid) {
            Some(list) => {
                *list = observers;
                true
            }
            None => false,
        }
    }

    // ── Grace timers ─────────────────────────────────────────────────────────

    pub fn arm_presence_timer(&mut self, uid: u32, timer: JoinHandle<()>) {
        if let Some(old) = self.presence_timers.insert(uid, timer) {
            old.abort();
        }
    }

    pub fn take_presence_timer(&mut self, uid: u32) -> Option<JoinHandle<()>> {
        self.presence_timers.remove(&uid)
    }

    pub fn presence_timer_armed(&self, uid: u32) -> bool {
        self.presence_timers.contains_key(&uid)
    }

    pub fn arm_token_timer(&mut self, channel: String, uid: u32, timer: JoinHandle<()>) {
        if let Some(old) = self.token_timers.insert((channel, uid), timer) {
            old.abort();
        }
    }

    pub fn take_token_timer(&mut self, channel: &str, uid: u32) -> Option<JoinHandle<()>> {
        self.token_timers.remove(&(channel.to_owned(), uid))
    }

    // ── Health counts ────────────────────────────────────────────────────────

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn pre_auth_count(&self) -> usize {
        self.pre_auth.len()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn online_count(&self) -> usize {
        self.online_users.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
