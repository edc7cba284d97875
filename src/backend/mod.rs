use reqwest::{redirect, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned a non-JSON body (status {status})")]
    InvalidBody { status: StatusCode },
}

/// HTTP client for the single backend callback endpoint.
///
/// Cheaply cloneable — `reqwest::Client` wraps an `Arc` internally.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    message_url: String,
    service_key: String,
    basic_auth: Option<(String, String)>,
}

impl BackendClient {
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            config.backend_message_url(),
            config.service_key.clone(),
            config.backend_basic_auth(),
            config.backend_strict_ssl,
        )
    }

    pub fn new(
        message_url: String,
        service_key: String,
        basic_auth: Option<(String, String)>,
        strict_ssl: bool,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            // A 301 from the backend must be treated as a rejection, so
            // redirects are never followed.
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(!strict_ssl)
            .build()?;

        Ok(Self {
            http,
            message_url,
            service_key,
            basic_auth,
        })
    }

    /// POST a message to the backend as a form with two fields: `messageJson`
    /// (the JSON-encoded message) and `serviceKey`.
    ///
    /// Never retries; callers decide what a failure means for them. The reply
    /// body is parsed as JSON — anything else is `BackendError::InvalidBody`.
    pub async fn send(&self, message: &Value) -> Result<(StatusCode, Value), BackendError> {
        let message_json = message.to_string();
        let mut request = self.http.post(&self.message_url).form(&[
            ("messageJson", message_json.as_str()),
            ("serviceKey", self.service_key.as_str()),
        ]);
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body =
            serde_json::from_str(&text).map_err(|_| BackendError::InvalidBody { status })?;
        Ok((status, body))
    }

    /// Compare a presented service key against the configured one in constant
    /// time, so response timing leaks nothing about the position of the first
    /// differing byte. An empty configured key accepts everything.
    pub fn check_service_key(&self, presented: &str) -> bool {
        if self.service_key.is_empty() {
            return true;
        }
        constant_time_eq(self.service_key.as_bytes(), presented.as_bytes())
    }
}

/// Constant-time byte comparison: XOR-accumulate across equal positions,
/// mismatch if lengths differ or the accumulator is nonzero.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
