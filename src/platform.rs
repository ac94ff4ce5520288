//! HTTP client for the dashboard platform's login endpoint.
//!
//! Basic credentials are exchanged here for the platform's own session
//! cookie; everything after that runs through the session path.

use std::time::Duration;

use crate::types::SessionCookie;
use async_trait::async_trait;
use http::HeaderMap;
use http::header::SET_COOKIE;
use serde_json::json;
use tracing::debug;

/// Errors from the login exchange with the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform could not be reached at all
    Transport(String),
    /// The platform answered but refused the login
    Rejected(String),
    /// The login went through but no session cookie came back
    MissingSession,
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(detail) => {
                write!(f, "could not reach the dashboard platform: {detail}")
            }
            Self::Rejected(detail) => {
                write!(f, "the dashboard platform rejected the login: {detail}")
            }
            Self::MissingSession => write!(f, "session does not exist"),
        }
    }
}

impl std::error::Error for PlatformError {}

/// The slice of the platform's API the gateway needs.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Log in with username and password, returning the session cookie
    /// the platform sets.
    async fn login(&self, username: &str, password: &str)
    -> Result<SessionCookie, PlatformError>;
}

/// [`PlatformClient`] talking to a real platform instance over HTTP.
pub struct HttpPlatformClient {
    base_url: String,
    session_cookie_name: String,
    client: reqwest::Client,
}

impl HttpPlatformClient {
    pub fn new(base_url: String, session_cookie_name: String) -> Self {
        Self {
            base_url,
            session_cookie_name,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<SessionCookie, PlatformError> {
        let url = format!("{}/login", self.base_url.trim_end_matches('/'));
        debug!(user = username, "logging in against the dashboard platform");

        let response = self
            .client
            .post(&url)
            .json(&json!({"user": username, "password": password}))
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            let body = response
                .text()
                .await
                .map_err(|e| PlatformError::Transport(e.to_string()))?;
            return Err(PlatformError::Rejected(body));
        }

        session_cookie_from(response.headers(), &self.session_cookie_name)
            .map(SessionCookie::new)
            .ok_or(PlatformError::MissingSession)
    }
}

/// Fish the named session cookie out of the response's Set-Cookie
/// headers. Attributes after the value are ignored; an empty value
/// counts as absent.
fn session_cookie_from(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    for value in headers.get_all(SET_COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if let Some(rest) = value.strip_prefix(&prefix) {
            let cookie = rest.split(';').next().unwrap_or_default().trim();
            if !cookie.is_empty() {
                return Some(cookie.to_string());
            }
        }
    }
    None
}
