use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::net::SocketAddr;
use std::sync::Arc;

use push_gateway::backend::BackendClient;
use push_gateway::config::Config;
use push_gateway::events::EventBus;
use push_gateway::session::{SessionManager, SessionSettings};
use push_gateway::state::{AppState, DebugToggle};
use push_gateway::{auth, handlers, websocket};

/// Middleware that restricts access to the metrics endpoint to loopback
/// connections only.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn log_directives(debug: bool) -> String {
    if debug {
        "push_gateway=debug,tower_http=debug".into()
    } else {
        "push_gateway=info,tower_http=info".into()
    }
}

#[tokio::main]
async fn main() {
    // Load configuration — fatal here, never later.
    let config = Config::from_env().expect("Failed to load configuration");

    // Initialize tracing — JSON in production, human-readable in dev. The
    // filter sits behind a reload layer so the admin debug toggle can swap
    // the log level at runtime.
    let initial_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(config.debug)));
    let (filter_layer, reload_handle) = tracing_subscriber::reload::Layer::new(initial_filter);

    let registry = tracing_subscriber::registry().with(filter_layer);
    if config.is_dev {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }

    info!("🚀 Push Gateway starting...");
    info!("📝 Configuration loaded");

    let debug_toggle = DebugToggle::new(config.debug, move |enabled| {
        if let Err(e) = reload_handle.reload(EnvFilter::new(log_directives(enabled))) {
            tracing::warn!(error = %e, "failed to reload log filter");
        }
    });

    let backend = BackendClient::from_config(&config).expect("Failed to build backend HTTP client");
    info!("🔌 Backend endpoint: {}", config.backend_message_url());

    // Extensions register their event subscribers here, before the first
    // socket arrives.
    let bus = EventBus::new();

    let sessions = SessionManager::new(backend.clone(), bus, SessionSettings::from_config(&config));

    // CORS: permissive in dev, origin-restricted in production.
    let cors = if config.is_dev {
        info!("🔓 CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!(
                "🔒 CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied"
            );
        } else {
            info!(
                "🔒 CORS: production mode, allowing origins: {:?}",
                config.allowed_origins
            );
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let addr = config.server_addr();
    let admin_base = config.admin_base_path().to_owned();

    let state = AppState {
        sessions,
        backend,
        config: Arc::new(config),
        debug: debug_toggle,
        started_at: chrono::Utc::now(),
    };

    // Prometheus metrics layer
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // Admin control plane. Every route — including the 404 fallback — sits
    // behind the service-key check.
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
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_service_key,
        ));

    let app = Router::new()
        .nest(&admin_base, admin)
        // Client socket surface
        .route("/ws", get(websocket::websocket_handler))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        .fallback(handlers::not_found)
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // ── Prometheus + CORS ──────────────────────────────────────────────
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(state);

    info!("🎧 Gateway listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // `into_make_service_with_connect_info` populates `ConnectInfo<SocketAddr>`
    // for the require_loopback middleware on /metrics.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed to start");
}
