//! REST Auth Service: `/auth/register` and `/auth/login`.

use std::time::Duration;

use chatline_types::api::{Account, AuthResponse, LoginRequest, RegisterRequest};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Connect and whole-request timeout for auth calls.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("please fill in all fields")]
    MissingFields,

    #[error("invalid data")]
    BadRequest,

    #[error("invalid credentials")]
    Unauthorized,

    #[error("username already exists")]
    Conflict,

    #[error("server error: {0}")]
    Server(u16),

    #[error("empty server response")]
    EmptyBody,

    #[error("invalid server response (missing token)")]
    MissingToken,

    #[error("invalid server response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Map a non-2xx status to its user-facing error.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Self::BadRequest,
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::CONFLICT => Self::Conflict,
            other => Self::Server(other.as_u16()),
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    http: Client,
    base_url: Url,
}

impl AuthService {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let mut base_url = Url::parse(base_url)?;
        // join() replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .connect_timeout(AUTH_TIMEOUT)
            .timeout(AUTH_TIMEOUT)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        let (username, password) = required(username, password)?;
        let body = RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let account = self.post("auth/register", &body, username).await?;
        info!("Registered {} (id {})", account.username, account.user_id);
        Ok(account)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        let (username, password) = required(username, password)?;
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let account = self.post("auth/login", &body, username).await?;
        info!("Logged in as {} (id {})", account.username, account.user_id);
        Ok(account)
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        username: &str,
    ) -> Result<Account, AuthError> {
        let url = self.base_url.join(path)?;
        let resp = self.http.post(url).json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            warn!("{} failed for {}: {}", path, username, status);
            return Err(AuthError::from_status(status));
        }

        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Err(AuthError::EmptyBody);
        }
        let parsed: AuthResponse = serde_json::from_str(&text)?;
        parsed
            .into_account(username)
            .ok_or(AuthError::MissingToken)
    }
}

/// Username is trimmed; the password is sent as typed.
fn required<'a>(username: &'a str, password: &'a str) -> Result<(&'a str, &'a str), AuthError> {
    let username = username.trim();
    if username.is_empty() || password.trim().is_empty() {
        return Err(AuthError::MissingFields);
    }
    Ok((username, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(AuthError::from_status(StatusCode::BAD_REQUEST), AuthError::BadRequest));
        assert!(matches!(AuthError::from_status(StatusCode::UNAUTHORIZED), AuthError::Unauthorized));
        assert!(matches!(AuthError::from_status(StatusCode::CONFLICT), AuthError::Conflict));
        assert_eq!(
            AuthError::from_status(StatusCode::BAD_GATEWAY).to_string(),
            "server error: 502"
        );
    }

    #[tokio::test]
    async fn blank_fields_never_reach_the_network() {
        // port 9 is never listened on; a request would fail differently
        let service = AuthService::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(service.login(" ", "secret").await, Err(AuthError::MissingFields)));
        assert!(matches!(service.register("alice", "  ").await, Err(AuthError::MissingFields)));
    }

    #[test]
    fn account_fallbacks() {
        let response: AuthResponse =
            serde_json::from_str(r#"{"access_token":"jwt","user":{}}"#).unwrap();
        let account = response.into_account("alice").unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(account.user_id, 0);

        let response: AuthResponse = serde_json::from_str(r#"{"user":{"id":3}}"#).unwrap();
        assert_eq!(response.into_account("alice"), None);
    }
}
