use crate::db_types::{CallPatch, CallRecord, CallStatus};
use crate::error::{handle_error, AppError};
use crate::signature::{validate_signature, SIGNATURE_HEADER};
use crate::tasks::{self, TranscriptionJob};
use crate::token::{self, AuthUser, VoiceTokenRequest, VOICE_TOKEN_TTL_SECS};
use crate::twilio_types::{
    empty_response, say_and_hang_up, wrap_twiml, DialAction, DialRecord, NumberNoun,
    RecordingPayload, Response, ResponseAction, StatusPayload, TranscriptionPayload,
    VoicePayload,
};
use crate::types::{AppState, RATE_LIMIT_WINDOW};
use crate::utils::{non_empty, normalize_phone_number, normalize_recording_url, parse_client_identity};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response as HttpResponse},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::types::time::OffsetDateTime;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

pub const VOICE_PATH: &str = "/twilio/voice";
pub const STATUS_PATH: &str = "/twilio/status";
pub const RECORDING_PATH: &str = "/twilio/recording";
pub const TRANSCRIPTION_PATH: &str = "/twilio/transcription";
pub const TOKEN_PATH: &str = "/voice/token";

const SETUP_MESSAGE: &str = "Calling is not set up for your account. Set up calling in Settings.";

fn twiml_response(twiml: String) -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
    (StatusCode::OK, headers, twiml).into_response()
}

/// Acknowledge a provider callback without further instructions.
fn ack() -> HttpResponse {
    twiml_response(empty_response())
}

/// One provider callback: the form body is read once and kept next to its signature and the
/// canonical URL the provider signed.
struct Webhook {
    body: String,
    params: Vec<(String, String)>,
    signature: Option<String>,
    canonical_url: String,
}

impl Webhook {
    fn read(
        app_state: &AppState,
        uri: &Uri,
        headers: &HeaderMap,
        body: String,
    ) -> Result<Self, serde_urlencoded::de::Error> {
        let params = serde_urlencoded::from_str::<Vec<(String, String)>>(&body)?;
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let path = uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or_else(|| uri.path());
        Ok(Self {
            canonical_url: app_state.public_url(path),
            body,
            params,
            signature,
        })
    }

    fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        serde_urlencoded::from_str(&self.body)
    }

    fn is_authentic(&self, auth_token: &str) -> bool {
        validate_signature(
            &self.params,
            self.signature.as_deref(),
            auth_token,
            &self.canonical_url,
        )
    }
}

/// A call record whose owner's credentials authenticated the current webhook.
struct VerifiedCall {
    record: CallRecord,
    account_sid: String,
    auth_token: String,
}

/// Find the record for `call_sid` and authenticate the webhook with its owner's credentials.
///
/// Unknown calls and unavailable credentials resolve to `None` so the provider sees a success
/// and does not retry; a bad signature is the only hard rejection.
async fn resolve_call(
    app_state: &AppState,
    webhook: &Webhook,
    call_sid: &str,
) -> Result<Option<VerifiedCall>, AppError> {
    let Some(record) = app_state
        .store
        .find_call_record_by_provider_call_id(call_sid)
        .await?
    else {
        debug!(call_sid=%call_sid, "no call record for webhook");
        return Ok(None);
    };
    let credentials = app_state
        .store
        .find_account_secret(record.user_id)
        .await?
        .and_then(|secret| {
            let auth_token = secret
                .auth_token_encrypted
                .as_deref()
                .and_then(|c| app_state.vault.safe_decrypt(c))?;
            Some((secret.account_sid, auth_token))
        });
    let Some((account_sid, auth_token)) = credentials else {
        warn!(call_sid=%call_sid, "credentials unavailable, ignoring webhook");
        return Ok(None);
    };
    if !webhook.is_authentic(&auth_token) {
        warn!(call_sid=%call_sid, "rejected webhook with invalid signature");
        return Err(AppError::Forbidden);
    }
    Ok(Some(VerifiedCall {
        record,
        account_sid,
        auth_token,
    }))
}

/// Why an origination request was turned away. Each maps to a spoken message and a hang-up.
#[derive(Debug, PartialEq, Eq)]
enum Refusal {
    MissingParameters,
    UnknownCaller,
    NotConfigured,
    Unauthorized,
    RateLimited { retry_after: u64 },
    InvalidNumber,
    Unavailable,
}

impl Refusal {
    fn message(&self) -> &'static str {
        match self {
            Refusal::MissingParameters => "This call is missing required details and cannot be placed.",
            Refusal::UnknownCaller => "We could not identify who is placing this call.",
            Refusal::NotConfigured => SETUP_MESSAGE,
            Refusal::Unauthorized => "This call could not be authorized.",
            Refusal::RateLimited { .. } => {
                "Too many calls have been placed. Please wait a moment and try again."
            }
            Refusal::InvalidNumber => "The number you dialed is not valid.",
            Refusal::Unavailable => "Calling is temporarily unavailable. Please try again.",
        }
    }
}

impl IntoResponse for Refusal {
    fn into_response(self) -> HttpResponse {
        let mut response = twiml_response(say_and_hang_up(self.message()));
        if let Refusal::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

/// Routing instructions for a browser-originated call. Every outcome, including refusals, is a
/// well-formed TwiML document.
pub async fn twiml_voice(
    State(app_state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let body = match String::from_utf8(body.to_vec()) {
        Ok(body) => body,
        Err(e) => {
            warn!(error=%e, "voice request body is not utf-8");
            return Refusal::MissingParameters.into_response();
        }
    };
    trace!(body=%body, "voice request body");
    let webhook = match Webhook::read(&app_state, &uri, &headers, body) {
        Ok(webhook) => webhook,
        Err(e) => {
            warn!(error=%e, "failed to parse voice request");
            return Refusal::MissingParameters.into_response();
        }
    };
    match originate(&app_state, &webhook).await {
        Ok(twiml) => twiml_response(twiml),
        Err(refusal) => {
            info!(refusal=?refusal, "refused call origination");
            refusal.into_response()
        }
    }
}

async fn originate(app_state: &AppState, webhook: &Webhook) -> Result<String, Refusal> {
    let payload: VoicePayload = webhook
        .payload()
        .map_err(|_| Refusal::MissingParameters)?;
    let account_sid = non_empty(payload.account_sid).ok_or(Refusal::MissingParameters)?;
    let to = non_empty(payload.to).ok_or(Refusal::MissingParameters)?;

    let user_id = payload
        .caller
        .as_deref()
        .and_then(parse_client_identity)
        .ok_or(Refusal::UnknownCaller)?;

    let secret = app_state
        .store
        .find_account_secret(user_id)
        .await
        .map_err(|e| {
            handle_error(&e);
            Refusal::Unavailable
        })?
        .ok_or(Refusal::NotConfigured)?;
    let caller_id = non_empty(secret.phone_number.clone()).ok_or(Refusal::NotConfigured)?;

    if let Some(encrypted) = secret.auth_token_encrypted.as_deref() {
        let auth_token = app_state
            .vault
            .safe_decrypt(encrypted)
            .ok_or(Refusal::Unauthorized)?;
        if !webhook.is_authentic(&auth_token) {
            warn!(user_id=%user_id, "rejected voice request with invalid signature");
            return Err(Refusal::Unauthorized);
        }
    }
    if account_sid != secret.account_sid {
        warn!(user_id=%user_id, "voice request for a different account");
        return Err(Refusal::Unauthorized);
    }

    let decision = app_state.rate_limiter.check_limit(
        &user_id.to_string(),
        "voice",
        app_state.config.voice_rate_limit,
        RATE_LIMIT_WINDOW,
    );
    if !decision.allowed {
        return Err(Refusal::RateLimited {
            retry_after: decision.retry_after(std::time::Instant::now()),
        });
    }

    let destination = normalize_phone_number(&to).ok_or(Refusal::InvalidNumber)?;

    let record_id = payload
        .call_record_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id.trim()).ok());
    if let (Some(record_id), Some(call_sid)) = (record_id, non_empty(payload.call_sid)) {
        let patch = CallPatch {
            provider_call_id: Some(call_sid),
            status: Some(CallStatus::Ringing),
            ..Default::default()
        };
        match app_state
            .store
            .update_call_record(record_id, Some(user_id), &patch)
            .await
        {
            Ok(Some(_)) => debug!(call_record_id=%record_id, "call record ringing"),
            Ok(None) => warn!(call_record_id=%record_id, "correlated call record not found"),
            Err(e) => handle_error(&e),
        }
    }

    let response = Response {
        actions: vec![ResponseAction::Dial(DialAction {
            caller_id,
            record: Some(DialRecord::RecordFromAnswer),
            recording_status_callback: Some(app_state.public_url(RECORDING_PATH)),
            recording_status_callback_method: Some("POST".to_string()),
            number: NumberNoun {
                number: destination,
            },
            ..Default::default()
        })],
    };
    let twiml = wrap_twiml(xmlserde::xml_serialize(response));
    trace!("twiml: '{}'", twiml);
    Ok(twiml)
}

/// Provider call-state transitions mapped onto the call record.
pub async fn status_callback(
    State(app_state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<HttpResponse, AppError> {
    let webhook = Webhook::read(&app_state, &uri, &headers, body)
        .map_err(|_| AppError::BadRequest("malformed form body"))?;
    let payload: StatusPayload = webhook
        .payload()
        .map_err(|_| AppError::BadRequest("malformed form body"))?;
    let (Some(call_sid), Some(call_status)) =
        (non_empty(payload.call_sid), non_empty(payload.call_status))
    else {
        return Err(AppError::BadRequest("CallSid and CallStatus are required"));
    };

    let Some(verified) = resolve_call(&app_state, &webhook, &call_sid).await? else {
        return Ok(ack());
    };

    let status = CallStatus::from_provider(&call_status);
    let ended_at = status.is_terminal().then(OffsetDateTime::now_utc);
    let duration_seconds = payload
        .call_duration
        .as_deref()
        .and_then(|d| d.trim().parse::<i32>().ok());
    debug!(call_sid=%call_sid, status=%status, duration=?duration_seconds, "call status update");
    let patch = CallPatch {
        status: Some(status),
        ended_at,
        duration_seconds,
        ..Default::default()
    };
    app_state
        .store
        .update_call_record(verified.record.id, None, &patch)
        .await?;
    Ok(ack())
}

/// Attach a finished recording and, for short calls, ask the provider for a transcription.
pub async fn recording_callback(
    State(app_state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<HttpResponse, AppError> {
    let webhook = Webhook::read(&app_state, &uri, &headers, body)
        .map_err(|_| AppError::BadRequest("malformed form body"))?;
    let payload: RecordingPayload = webhook
        .payload()
        .map_err(|_| AppError::BadRequest("malformed form body"))?;
    let (Some(call_sid), Some(recording_url), Some(recording_sid), Some(duration), Some(status)) = (
        non_empty(payload.call_sid),
        non_empty(payload.recording_url),
        non_empty(payload.recording_sid),
        non_empty(payload.recording_duration),
        non_empty(payload.recording_status),
    ) else {
        return Err(AppError::BadRequest("recording callback is missing required fields"));
    };

    // fires for in-progress and absent recordings too
    if status != "completed" {
        debug!(call_sid=%call_sid, status=%status, "recording not completed yet");
        return Ok(ack());
    }

    let Some(verified) = resolve_call(&app_state, &webhook, &call_sid).await? else {
        return Ok(ack());
    };

    let patch = CallPatch {
        recording_url: Some(normalize_recording_url(&recording_url)),
        ..Default::default()
    };
    app_state
        .store
        .update_call_record(verified.record.id, None, &patch)
        .await?;

    let duration_secs = duration.parse::<u32>().unwrap_or(0);
    if tasks::should_transcribe(duration_secs) {
        tasks::spawn_transcription(
            app_state.http_client.clone(),
            TranscriptionJob {
                api_base: app_state.config.twilio_api_base.clone(),
                account_sid: verified.account_sid,
                auth_token: verified.auth_token,
                recording_sid,
                callback_url: app_state.public_url(TRANSCRIPTION_PATH),
            },
        );
    } else {
        info!(call_sid=%call_sid, duration_secs, "skipping transcription");
    }
    Ok(ack())
}

/// Store a finished transcription together with a best-effort summary.
pub async fn transcription_callback(
    State(app_state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<HttpResponse, AppError> {
    let webhook = Webhook::read(&app_state, &uri, &headers, body)
        .map_err(|_| AppError::BadRequest("malformed form body"))?;
    let payload: TranscriptionPayload = webhook
        .payload()
        .map_err(|_| AppError::BadRequest("malformed form body"))?;
    let (Some(call_sid), Some(status)) = (
        non_empty(payload.call_sid),
        non_empty(payload.transcription_status),
    ) else {
        return Err(AppError::BadRequest("CallSid and TranscriptionStatus are required"));
    };
    if status != "completed" {
        info!(call_sid=%call_sid, status=%status, recording_sid=?payload.recording_sid, "transcription not completed");
        return Ok(ack());
    }

    let Some(verified) = resolve_call(&app_state, &webhook, &call_sid).await? else {
        return Ok(ack());
    };

    let transcription = payload.transcription_text.unwrap_or_default();
    let summary = tasks::summarize_transcription(
        &app_state.http_client,
        &app_state.config.openai_api_base,
        app_state.config.openai_api_key.as_deref(),
        &transcription,
    )
    .await;
    let patch = CallPatch {
        transcription: Some(transcription),
        summary: Some(summary),
        ..Default::default()
    };
    app_state
        .store
        .update_call_record(verified.record.id, None, &patch)
        .await?;
    Ok(ack())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub identity: String,
    pub expires_in: u64,
}

/// Signaling token for the signed-in user's browser device.
pub async fn voice_token(
    State(app_state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<TokenResponse>, AppError> {
    let decision = app_state.rate_limiter.check_limit(
        &user_id.to_string(),
        "token",
        app_state.config.token_rate_limit,
        RATE_LIMIT_WINDOW,
    );
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after: decision.retry_after(std::time::Instant::now()),
        });
    }

    let secret = app_state
        .store
        .find_account_secret(user_id)
        .await?
        .ok_or(AppError::NotConfigured(SETUP_MESSAGE))?;
    let (Some(api_key_sid), Some(api_key_secret), Some(application_sid)) = (
        secret.api_key_sid.as_deref(),
        secret
            .api_key_secret_encrypted
            .as_deref()
            .and_then(|c| app_state.vault.safe_decrypt(c)),
        secret.twiml_app_sid.as_deref(),
    ) else {
        return Err(AppError::NotConfigured(SETUP_MESSAGE));
    };

    let identity = user_id.to_string();
    let token = token::mint_voice_token(
        &VoiceTokenRequest {
            account_sid: &secret.account_sid,
            api_key_sid,
            api_key_secret: &api_key_secret,
            application_sid,
            identity: &identity,
        },
        token::unix_now(),
        VOICE_TOKEN_TTL_SECS,
    )
    .map_err(|e| {
        handle_error(&e);
        AppError::Internal("failed to issue voice token")
    })?;
    debug!(user_id=%user_id, "issued voice token");
    Ok(Json(TokenResponse {
        token,
        identity,
        expires_in: VOICE_TOKEN_TTL_SECS,
    }))
}

pub async fn health() -> &'static str {
    "OK"
}
