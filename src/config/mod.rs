use std::env;

use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("BASE_AUTH_PATH must start with '/' and must not be the root path: {0}")]
    InvalidBasePath(String),

    #[error("Invalid backend endpoint {url}: {source}")]
    InvalidBackendUrl {
        url: String,
        source: url::ParseError,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,

    /// Prefix for the admin control plane, e.g. `/nodejs/`.
    pub base_auth_path: String,
    /// Shared secret required on every admin request. Empty means accept all.
    pub service_key: String,

    pub backend_scheme: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub backend_base_path: String,
    pub backend_message_path: String,
    /// When the backend scheme is HTTPS, verify its certificate.
    pub backend_strict_ssl: bool,
    /// Optional `user:pass` credentials for HTTP Basic auth on backend calls.
    pub backend_http_auth: String,

    pub clients_can_write_to_clients: bool,
    pub clients_can_write_to_channels: bool,

    /// Delay before an offline/disconnect notification fires, absorbing the
    /// disconnect-then-reconnect of a browser refresh.
    pub grace_period_ms: u64,

    pub debug: bool,
    pub is_dev: bool,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config {
            server_host: env_or("SERVER_HOST", "127.0.0.1"),
            server_port: parse_env("SERVER_PORT", 8080)?,
            base_auth_path: env_or("BASE_AUTH_PATH", "/nodejs/"),
            service_key: env_or("SERVICE_KEY", ""),
            backend_scheme: env_or("BACKEND_SCHEME", "http"),
            backend_host: env_or("BACKEND_HOST", "localhost"),
            backend_port: parse_env("BACKEND_PORT", 80)?,
            backend_base_path: env_or("BACKEND_BASE_PATH", "/nodejs/"),
            backend_message_path: env_or("BACKEND_MESSAGE_PATH", "message"),
            backend_strict_ssl: bool_env("BACKEND_STRICT_SSL", true),
            backend_http_auth: env_or("BACKEND_HTTP_AUTH", ""),
            clients_can_write_to_clients: bool_env("CLIENTS_CAN_WRITE_TO_CLIENTS", false),
            clients_can_write_to_channels: bool_env("CLIENTS_CAN_WRITE_TO_CHANNELS", false),
            grace_period_ms: parse_env("GRACE_PERIOD_MS", 2000)?,
            debug: bool_env("DEBUG", false),
            is_dev: env::var("APP_ENV").as_deref() != Ok("production"),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_owned())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        if !config.base_auth_path.starts_with('/') || config.admin_base_path().is_empty() {
            return Err(ConfigError::InvalidBasePath(config.base_auth_path));
        }

        // Fail at startup, not on the first authentication attempt.
        let message_url = config.backend_message_url();
        Url::parse(&message_url).map_err(|source| ConfigError::InvalidBackendUrl {
            url: message_url,
            source,
        })?;

        Ok(config)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// The admin prefix without its trailing slash, suitable for `Router::nest`.
    pub fn admin_base_path(&self) -> &str {
        self.base_auth_path.trim_end_matches('/')
    }

    /// Full URL of the backend message endpoint,
    /// e.g. `http://localhost:80/nodejs/message`.
    pub fn backend_message_url(&self) -> String {
        let base = self.backend_base_path.trim_matches('/');
        let path = self.backend_message_path.trim_start_matches('/');
        if base.is_empty() {
            format!(
                "{}://{}:{}/{}",
                self.backend_scheme, self.backend_host, self.backend_port, path
            )
        } else {
            format!(
                "{}://{}:{}/{}/{}",
                self.backend_scheme, self.backend_host, self.backend_port, base, path
            )
        }
    }

    /// Split `user:pass` Basic-auth credentials; `None` when unconfigured.
    pub fn backend_basic_auth(&self) -> Option<(String, String)> {
        let (user, pass) = self.backend_http_auth.split_once(':')?;
        if user.is_empty() {
            return None;
        }
        Some((user.to_owned(), pass.to_owned()))
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn bool_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "True"),
        Err(_) => default,
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
        Err(_) => Ok(default),
    }
}
