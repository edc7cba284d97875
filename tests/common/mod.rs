// Each integration test file is a separate binary; helpers not used in every
// binary would otherwise trigger dead_code warnings from clippy.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    routing::{get, post},
    Form, Json, Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use push_gateway::auth;
use push_gateway::backend::BackendClient;
use push_gateway::config::Config;
use push_gateway::events::EventBus;
use push_gateway::handlers;
use push_gateway::models::AuthenticateRequest;
use push_gateway::session::{ClientHandle, SessionManager, SessionSettings};
use push_gateway::state::{AppState, DebugToggle};

pub const TEST_SERVICE_KEY: &str = "__LOL_TESTING__";

/// Grace period used by all test states — short enough to wait out in a test,
/// long enough to reconnect inside.
pub const TEST_GRACE: Duration = Duration::from_millis(50);

/// A sleep comfortably past the grace period.
pub async fn outlive_grace() {
    tokio::time::sleep(TEST_GRACE * 4).await;
}

fn test_config() -> Config {
    Config {
        server_host: "127.0.0.1".into(),
        server_port: 0,
        base_auth_path: "/nodejs/".into(),
        service_key: TEST_SERVICE_KEY.into(),
        backend_scheme: "http".into(),
        backend_host: "127.0.0.1".into(),
        backend_port: 9,
        backend_base_path: "/nodejs/".into(),
        backend_message_path: "message".into(),
        backend_strict_ssl: true,
        backend_http_auth: String::new(),
        clients_can_write_to_clients: false,
        clients_can_write_to_channels: false,
        grace_period_ms: TEST_GRACE.as_millis() as u64,
        debug: false,
        is_dev: true,
        allowed_origins: Vec::new(),
    }
}

/// Build an `AppState` wired to the given backend URL. With `None` the
/// backend is unreachable (TCP port 9), which suits tests that never expect
/// an authentication round-trip to succeed.
pub fn test_state(backend_url: Option<String>) -> AppState {
    let url = backend_url.unwrap_or_else(|| "http://127.0.0.1:9/nodejs/message".to_owned());
    let backend = BackendClient::new(url, TEST_SERVICE_KEY.into(), None, true)
        .expect("test backend client");
    let config = test_config();
    let sessions = SessionManager::new(
        backend.clone(),
        EventBus::new(),
        SessionSettings {
            clients_can_write_to_clients: config.clients_can_write_to_clients,
            clients_can_write_to_channels: config.clients_can_write_to_channels,
            grace_period: TEST_GRACE,
        },
    );
    AppState {
        sessions,
        backend,
        config: Arc::new(config),
        debug: DebugToggle::noop(false),
        started_at: chrono::Utc::now(),
    }
}

/// Build the gateway router the way main.rs does (minus the metrics layer).
pub fn create_test_app(state: AppState) -> Router {
    let admin = Router::new()
        .route("/publish", post(handlers::publish::publish))
        .route("/user/kick/:uid", post(handlers::users::kick_user))
        .route("/user/logout/:authtoken", post(handlers::users::logout_user))
        .route(
            "/user/channel/add/:channel/:uid",
            post(handlers::users::add_user_to_channel),
        )
        .route(
            "/user/channel/remove/:channel/:uid",
            post(handlers::users::remove_user_from_channel),
        )
        .route("/channel/add/:channel", post(handlers::channels::add_channel))
        .route(
            "/channel/check/:channel",
            get(handlers::channels::check_channel),
        )
        .route(
            "/channel/remove/:channel",
            post(handlers::channels::remove_channel),
        )
        .route("/health/check", get(handlers::health_check))
        .route(
            "/user/presence-list/:uid/:uidList",
            get(handlers::users::set_presence_list),
        )
        .route("/debug/toggle", post(handlers::toggle_debug))
        .route(
            "/content/token/users",
            post(handlers::tokens::content_token_users),
        )
        .route("/content/token", post(handlers::tokens::set_content_token))
        .route(
            "/content/token/message",
            post(handlers::publish::publish_to_content_channel),
        )
        .route(
            "/authtoken/channel/add/:channel/:authToken",
            post(handlers::channels::add_auth_token_to_channel),
        )
        .route(
            "/authtoken/channel/remove/:channel/:authToken",
            post(handlers::channels::remove_auth_token_from_channel),
        )
        .fallback(handlers::not_found)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_service_key,
        ));

    Router::new()
        .nest("/nodejs", admin)
        .route("/ws", get(push_gateway::websocket::websocket_handler))
        .fallback(handlers::not_found)
        .with_state(state)
}

// ── Recording client double ──────────────────────────────────────────────────

/// `ClientHandle` implementation that records every payload instead of
/// writing to a socket.
pub struct RecordingClient {
    id: String,
    sent: Mutex<Vec<Value>>,
    closed: AtomicBool,
}

impl RecordingClient {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ClientHandle for RecordingClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn send_json(&self, value: &Value) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sent.lock().unwrap().push(value.clone());
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn auth_request(token: &str, ack_id: Option<u64>) -> AuthenticateRequest {
    AuthenticateRequest {
        auth_token: token.to_owned(),
        content_tokens: None,
        ack_id,
        extra: Map::new(),
    }
}

// ── Stub backend ─────────────────────────────────────────────────────────────

/// Fake CMS backend bound to an ephemeral loopback port.
///
/// Knows a fixed set of auth tokens; `authenticate` messages for known tokens
/// are answered with the registered identity fields (echoing `clientId` and
/// `authToken`), unknown tokens get `nodejsValidAuthToken: false`. Every
/// decoded `messageJson` is recorded for assertions.
pub struct StubBackend {
    pub url: String,
    pub received: Arc<Mutex<Vec<Value>>>,
}

impl StubBackend {
    pub fn messages(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn messages_of_type(&self, message_type: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["messageType"] == message_type)
            .collect()
    }
}

pub async fn spawn_backend(identities: Vec<(&str, Value)>) -> StubBackend {
    let identities: HashMap<String, Value> = identities
        .into_iter()
        .map(|(token, identity)| (token.to_owned(), identity))
        .collect();
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub backend");
    let addr = listener.local_addr().expect("stub backend addr");

    let record = received.clone();
    let app = Router::new().route(
        "/nodejs/message",
        post(move |Form(fields): Form<HashMap<String, String>>| {
            let identities = identities.clone();
            let record = record.clone();
            async move {
                let message: Value = fields
                    .get("messageJson")
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or(Value::Null);
                record.lock().unwrap().push(message.clone());

                if message["messageType"] != "authenticate" {
                    return Json(json!({ "status": "ok" }));
                }

                let token = message["authToken"].as_str().unwrap_or_default();
                match identities.get(token) {
                    Some(identity) => {
                        let mut reply = identity.clone();
                        if let Some(map) = reply.as_object_mut() {
                            map.entry("nodejsValidAuthToken").or_insert(json!(true));
                            map.insert("authToken".into(), json!(token));
                            map.insert("clientId".into(), message["clientId"].clone());
                        }
                        Json(reply)
                    }
                    None => Json(json!({ "nodejsValidAuthToken": false })),
                }
            }
        }),
    );

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub backend serve");
    });

    StubBackend {
        url: format!("http://{addr}/nodejs/message"),
        received,
    }
}

// ── Request helpers ──────────────────────────────────────────────────────────

pub async fn get_with_key(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(auth::SERVICE_KEY_HEADER, TEST_SERVICE_KEY)
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn get_no_key(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn post_with_key(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(auth::SERVICE_KEY_HEADER, TEST_SERVICE_KEY)
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn post_json_with_key(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(auth::SERVICE_KEY_HEADER, TEST_SERVICE_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

pub async fn post_json_no_key(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

/// GET returning the raw body, for plain-text responses.
pub async fn get_raw_with_key(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(auth::SERVICE_KEY_HEADER, TEST_SERVICE_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
