use crate::error::handle_error;
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload};

use std::time::Duration;
use thiserror::Error;
use tokio::task;
use tracing::{debug, info, warn};

pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
/// The provider refuses to transcribe recordings longer than this.
pub const TRANSCRIPTION_MAX_SECS: u32 = 120;

const SUMMARY_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("completion had no choices")]
    EmptyCompletion,
}

/// Everything needed to ask the provider to transcribe one recording.
#[derive(Debug, Clone)]
pub struct TranscriptionJob {
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    pub recording_sid: String,
    pub callback_url: String,
}

pub fn should_transcribe(duration_secs: u32) -> bool {
    duration_secs > 0 && duration_secs <= TRANSCRIPTION_MAX_SECS
}

/// Ask the provider to transcribe a recording; the text arrives later on `callback_url`.
pub async fn request_transcription(
    http_client: &reqwest::Client,
    job: &TranscriptionJob,
) -> Result<(), TaskError> {
    let url = format!(
        "{}/2010-04-01/Accounts/{}/Recordings/{}/Transcriptions.json",
        job.api_base, job.account_sid, job.recording_sid
    );
    let resp = http_client
        .post(url)
        .basic_auth(&job.account_sid, Some(&job.auth_token))
        .form(&[("TranscribeCallback", job.callback_url.as_str())])
        .timeout(PROVIDER_TIMEOUT)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(TaskError::Status(resp.status()));
    }
    info!(recording_sid=%job.recording_sid, "transcription requested");
    Ok(())
}

/// Fire-and-forget wrapper around [`request_transcription`]; failures are only logged.
pub fn spawn_transcription(http_client: reqwest::Client, job: TranscriptionJob) -> task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = request_transcription(&http_client, &job).await {
            warn!(recording_sid=%job.recording_sid, "transcription request failed");
            handle_error(&e);
        }
    })
}

async fn request_summary(
    http_client: &reqwest::Client,
    api_base: &str,
    api_key: &str,
    transcript: &str,
) -> Result<String, TaskError> {
    let url = format!("{api_base}/v1/chat/completions");
    let payload = OpenAIPayload {
        model: SUMMARY_MODEL.to_string(),
        messages: vec![
            OpenAIMessage {
                role: "system".to_string(),
                content: "You summarize sales calls for the rep who made them.".to_string(),
            },
            OpenAIMessage {
                role: "user".to_string(),
                content: format!(
                    "In two or three sentences, summarize this call and any agreed next step:\n\n{transcript}"
                ),
            },
        ],
        max_tokens: Some(200),
        temperature: Some(0.3),
    };
    let resp = http_client
        .post(url)
        .header(reqwest::header::AUTHORIZATION, format!("Bearer {api_key}"))
        .json(&payload)
        .timeout(PROVIDER_TIMEOUT)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(TaskError::Status(resp.status()));
    }
    let resp = resp.json::<OpenAIBatchResponse>().await?;
    debug!(
        id=%resp.id,
        model=%resp.model,
        tokens=?resp.usage.as_ref().map(|u| u.total_tokens),
        "summary completion"
    );
    let choice = resp.choices.into_iter().next().ok_or(TaskError::EmptyCompletion)?;
    debug!(finish_reason=?choice.finish_reason, "summary finished");
    Ok(choice.message.content.trim().to_string())
}

/// Best-effort call summary. Any failure, or a missing API key, yields an empty string.
pub async fn summarize_transcription(
    http_client: &reqwest::Client,
    api_base: &str,
    api_key: Option<&str>,
    transcript: &str,
) -> String {
    let Some(api_key) = api_key else {
        return String::new();
    };
    if transcript.trim().is_empty() {
        return String::new();
    }
    match request_summary(http_client, api_base, api_key, transcript).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!("call summary unavailable");
            handle_error(&e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(api_base: &str) -> TranscriptionJob {
        TranscriptionJob {
            api_base: api_base.to_string(),
            account_sid: "AC1".to_string(),
            auth_token: "token".to_string(),
            recording_sid: "RE1".to_string(),
            callback_url: "https://dialer.test/twilio/transcription".to_string(),
        }
    }

    #[test]
    fn transcription_ceiling() {
        assert!(!should_transcribe(0));
        assert!(should_transcribe(1));
        assert!(should_transcribe(120));
        assert!(!should_transcribe(121));
        assert!(!should_transcribe(200));
    }

    #[tokio::test]
    async fn transcription_request_is_authenticated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC1/Recordings/RE1/Transcriptions.json"))
            // base64("AC1:token")
            .and(header("authorization", "Basic QUMxOnRva2Vu"))
            .and(body_string_contains("TranscribeCallback="))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        request_transcription(&reqwest::Client::new(), &job(&server.uri()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transcription_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = request_transcription(&reqwest::Client::new(), &job(&server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Status(s) if s.as_u16() == 404));
    }

    #[tokio::test]
    async fn summary_uses_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o-mini",
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
                "choices": [{
                    "index": 0,
                    "finish_reason": "stop",
                    "message": {"role": "assistant", "content": " Booked a demo for Friday. "}
                }]
            })))
            .mount(&server)
            .await;

        let summary = summarize_transcription(
            &reqwest::Client::new(),
            &server.uri(),
            Some("sk-test"),
            "Rep: would Friday work? Lead: yes.",
        )
        .await;
        assert_eq!(summary, "Booked a demo for Friday.");
    }

    #[tokio::test]
    async fn summary_degrades_to_empty_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        assert_eq!(
            summarize_transcription(&client, &server.uri(), Some("sk-test"), "hello").await,
            ""
        );
        assert_eq!(summarize_transcription(&client, &server.uri(), None, "hello").await, "");
    }
}
