use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::handlers::TOKEN_PATH;

pub const TOKEN_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("no signed-in session")]
    NoSession,
    #[error("session expired")]
    SessionExpired,
    #[error("calling is not configured: {0}")]
    NotConfigured(String),
    #[error("token request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceToken {
    pub token: String,
    pub identity: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
}

/// Where the signed-in user's bearer token comes from.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_session(&self) -> Option<Session>;
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<VoiceToken, TokenError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Fetches voice tokens from the backend's token endpoint with the session bearer token.
pub struct HttpTokenSource<P> {
    http_client: reqwest::Client,
    base_url: String,
    sessions: P,
    timeout: Duration,
}

impl<P: SessionProvider> HttpTokenSource<P> {
    pub fn new(http_client: reqwest::Client, base_url: &str, sessions: P) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sessions,
            timeout: TOKEN_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<P: SessionProvider> TokenSource for HttpTokenSource<P> {
    async fn fetch_token(&self) -> Result<VoiceToken, TokenError> {
        let session = self
            .sessions
            .current_session()
            .await
            .ok_or(TokenError::NoSession)?;
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        debug!(%url, "fetching voice token");

        let res = self
            .http_client
            .get(&url)
            .bearer_auth(&session.access_token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!("voice token request failed: {e}");
                TokenError::Transport(e.to_string())
            })?;

        match res.status() {
            StatusCode::OK => res
                .json::<VoiceToken>()
                .await
                .map_err(|e| TokenError::Transport(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(TokenError::SessionExpired),
            StatusCode::PRECONDITION_FAILED => {
                let message = res
                    .json::<ErrorBody>()
                    .await
                    .map(|b| b.error)
                    .unwrap_or_else(|_| "set up calling in Settings".to_string());
                Err(TokenError::NotConfigured(message))
            }
            status => Err(TokenError::Transport(format!("unexpected status {status}"))),
        }
    }
}
