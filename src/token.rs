//! Session verification for browser requests and minting of provider signaling tokens.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::types::AppState;

pub const VOICE_TOKEN_TTL_SECS: u64 = 3_600;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: u64,
}

/// Verify a bearer session token (HS256, `sub` = user id).
pub fn verify_session(token: &str, secret: &str) -> Result<Uuid, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    let data = jsonwebtoken::decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AppError::Unauthorized)?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)
}

/// The authenticated user behind a request's `Authorization: Bearer` session.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;
        verify_session(token.trim(), &state.config.session_jwt_secret).map(AuthUser)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingGrant {
    pub application_sid: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingGrant {
    pub allow: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceGrant {
    pub incoming: IncomingGrant,
    pub outgoing: OutgoingGrant,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grants {
    pub identity: String,
    pub voice: VoiceGrant,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    pub jti: String,
    pub iss: String,
    pub sub: String,
    pub iat: u64,
    pub nbf: u64,
    pub exp: u64,
    pub grants: Grants,
}

pub struct VoiceTokenRequest<'a> {
    pub account_sid: &'a str,
    pub api_key_sid: &'a str,
    pub api_key_secret: &'a str,
    pub application_sid: &'a str,
    pub identity: &'a str,
}

/// Mint an outbound-only voice access token signed with the account's API key secret.
pub fn mint_voice_token(
    request: &VoiceTokenRequest,
    now: u64,
    ttl_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let mut header = Header::new(Algorithm::HS256);
    header.cty = Some("twilio-fpa;v=1".to_string());
    let claims = AccessTokenClaims {
        jti: format!("{}-{now}", request.api_key_sid),
        iss: request.api_key_sid.to_string(),
        sub: request.account_sid.to_string(),
        iat: now,
        nbf: now,
        exp: now + ttl_secs,
        grants: Grants {
            identity: request.identity.to_string(),
            voice: VoiceGrant {
                incoming: IncomingGrant { allow: false },
                outgoing: OutgoingGrant {
                    application_sid: request.application_sid.to_string(),
                },
            },
        },
    };
    jsonwebtoken::encode(
        &header,
        &claims,
        &EncodingKey::from_secret(request.api_key_secret.as_bytes()),
    )
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
pub fn session_token(user_id: Uuid, secret: &str) -> String {
    let claims = SessionClaims {
        sub: user_id.to_string(),
        exp: unix_now() + 600,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_carries_outbound_voice_grant() {
        let request = VoiceTokenRequest {
            account_sid: "AC123",
            api_key_sid: "SK456",
            api_key_secret: "api-secret",
            application_sid: "AP789",
            identity: "4f6c1b1e-0000-4000-8000-000000000001",
        };
        let now = unix_now();
        let token = mint_voice_token(&request, now, VOICE_TOKEN_TTL_SECS).unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.cty.as_deref(), Some("twilio-fpa;v=1"));

        let data = jsonwebtoken::decode::<AccessTokenClaims>(
            &token,
            &DecodingKey::from_secret(b"api-secret"),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(data.claims.iss, "SK456");
        assert_eq!(data.claims.sub, "AC123");
        assert_eq!(data.claims.exp, now + VOICE_TOKEN_TTL_SECS);
        assert_eq!(data.claims.grants.identity, request.identity);
        assert!(!data.claims.grants.voice.incoming.allow);
        assert_eq!(data.claims.grants.voice.outgoing.application_sid, "AP789");
    }

    #[test]
    fn session_tokens_are_verified() {
        let user = Uuid::new_v4();
        let token = session_token(user, "session-secret");
        assert_eq!(verify_session(&token, "session-secret").unwrap(), user);
        assert!(matches!(
            verify_session(&token, "other-secret"),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            verify_session("garbage", "session-secret"),
            Err(AppError::Unauthorized)
        ));
    }
}
