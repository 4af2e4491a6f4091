use std::fmt;
use std::str::FromStr;

use sqlx::types::time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle status of a call, shared by the stored record and the client-side call handle.
///
/// Provider values outside the known vocabulary are carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Reconnecting,
    Completed,
    Failed,
    Other(String),
}

impl CallStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Reconnecting => "reconnecting",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }

    /// Map the provider's call status vocabulary onto ours.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "queued" | "initiated" => CallStatus::Initiated,
            "ringing" => CallStatus::Ringing,
            "in-progress" => CallStatus::InProgress,
            "completed" => CallStatus::Completed,
            "busy" | "no-answer" | "failed" | "canceled" => CallStatus::Failed,
            other => CallStatus::Other(other.to_string()),
        }
    }
}

impl FromStr for CallStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "initiated" => CallStatus::Initiated,
            "ringing" => CallStatus::Ringing,
            "in-progress" => CallStatus::InProgress,
            "reconnecting" => CallStatus::Reconnecting,
            "completed" => CallStatus::Completed,
            "failed" => CallStatus::Failed,
            other => CallStatus::Other(other.to_string()),
        })
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-entered disposition, recorded after the call ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Connected,
    Voicemail,
    NoAnswer,
    Busy,
    WrongNumber,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Connected => "connected",
            CallOutcome::Voicemail => "voicemail",
            CallOutcome::NoAnswer => "no-answer",
            CallOutcome::Busy => "busy",
            CallOutcome::WrongNumber => "wrong-number",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "connected" => Some(CallOutcome::Connected),
            "voicemail" => Some(CallOutcome::Voicemail),
            "no-answer" => Some(CallOutcome::NoAnswer),
            "busy" => Some(CallOutcome::Busy),
            "wrong-number" => Some(CallOutcome::WrongNumber),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lead_id: Uuid,
    pub provider_call_id: Option<String>,
    pub from_number: String,
    pub to_number: String,
    pub status: CallStatus,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub duration_seconds: Option<i32>,
    pub recording_url: Option<String>,
    pub transcription: Option<String>,
    pub summary: Option<String>,
    pub outcome: Option<CallOutcome>,
    pub notes: Option<String>,
}

impl CallRecord {
    pub fn new(user_id: Uuid, lead_id: Uuid, from_number: String, to_number: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            lead_id,
            provider_call_id: None,
            from_number,
            to_number,
            status: CallStatus::Initiated,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            duration_seconds: None,
            recording_url: None,
            transcription: None,
            summary: None,
            outcome: None,
            notes: None,
        }
    }

    /// Merge a patch. The provider call id and `ended_at` are set at most once, and a terminal
    /// status is never replaced.
    pub fn apply(&mut self, patch: &CallPatch) {
        if self.provider_call_id.is_none() {
            self.provider_call_id = patch.provider_call_id.clone();
        }
        if let Some(status) = &patch.status {
            if !self.status.is_terminal() {
                self.status = status.clone();
            }
        }
        if self.ended_at.is_none() {
            self.ended_at = patch.ended_at;
        }
        if patch.duration_seconds.is_some() {
            self.duration_seconds = patch.duration_seconds;
        }
        if patch.recording_url.is_some() {
            self.recording_url = patch.recording_url.clone();
        }
        if patch.transcription.is_some() {
            self.transcription = patch.transcription.clone();
        }
        if patch.summary.is_some() {
            self.summary = patch.summary.clone();
        }
        if patch.outcome.is_some() {
            self.outcome = patch.outcome;
        }
        if patch.notes.is_some() {
            self.notes = patch.notes.clone();
        }
    }
}

/// Partial update of a [`CallRecord`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallPatch {
    pub provider_call_id: Option<String>,
    pub status: Option<CallStatus>,
    pub ended_at: Option<OffsetDateTime>,
    pub duration_seconds: Option<i32>,
    pub recording_url: Option<String>,
    pub transcription: Option<String>,
    pub summary: Option<String>,
    pub outcome: Option<CallOutcome>,
    pub notes: Option<String>,
}

/// Per-user provider credentials. Secret fields hold vault ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSecret {
    pub user_id: Uuid,
    pub account_sid: String,
    pub auth_token_encrypted: Option<String>,
    pub phone_number: Option<String>,
    pub api_key_sid: Option<String>,
    pub api_key_secret_encrypted: Option<String>,
    pub twiml_app_sid: Option<String>,
}
