use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

use crate::db_types::CallStatus;

const TICK: Duration = Duration::from_secs(1);

/// Events the SDK reports for an active call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Ringing,
    Accept,
    Reconnecting,
    Reconnected,
    Disconnect,
    Cancel,
    Error(String),
}

/// The call transition table. `None` means the event is not an edge from `from` and is ignored.
pub fn transition(from: &CallStatus, event: &CallEvent) -> Option<CallStatus> {
    use CallStatus::*;
    match (from, event) {
        (Initiated, CallEvent::Ringing) => Some(Ringing),
        (Initiated | Ringing, CallEvent::Accept) => Some(InProgress),
        (InProgress, CallEvent::Reconnecting) => Some(Reconnecting),
        (Reconnecting, CallEvent::Reconnected) => Some(InProgress),
        (s, CallEvent::Disconnect) if !s.is_terminal() => Some(Completed),
        (s, CallEvent::Cancel | CallEvent::Error(_)) if !s.is_terminal() => Some(Failed),
        _ => None,
    }
}

/// How a finished call ended, kept for the UI after the handle is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub correlation_id: Uuid,
    pub number: String,
    pub status: CallStatus,
    pub duration: Duration,
}

/// Local state of the one call a device is running.
pub struct ActiveCall {
    pub correlation_id: Uuid,
    pub number: String,
    status: CallStatus,
    muted: bool,
    accepted_at: Option<Instant>,
    frozen: Option<Duration>,
    ticker: Option<CancellationToken>,
    seconds: Arc<watch::Sender<u64>>,
}

impl ActiveCall {
    pub(crate) fn new(correlation_id: Uuid, number: String, seconds: Arc<watch::Sender<u64>>) -> Self {
        seconds.send_replace(0);
        Self {
            correlation_id,
            number,
            status: CallStatus::Initiated,
            muted: false,
            accepted_at: None,
            frozen: None,
            ticker: None,
            seconds,
        }
    }

    pub fn status(&self) -> &CallStatus {
        &self.status
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Time since the call was answered, recomputed from the captured instant; frozen once the
    /// call ends.
    pub fn duration(&self) -> Duration {
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        self.accepted_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Apply an SDK event. Returns the new status when the event was a valid edge.
    pub(crate) fn apply(&mut self, event: &CallEvent) -> Option<CallStatus> {
        let next = transition(&self.status, event)?;
        if next == CallStatus::InProgress && self.accepted_at.is_none() {
            self.start_clock();
        }
        if next.is_terminal() {
            self.stop_clock();
            self.muted = false;
        }
        self.status = next.clone();
        Some(next)
    }

    pub(crate) fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            correlation_id: self.correlation_id,
            number: self.number.clone(),
            status: self.status.clone(),
            duration: self.duration(),
        }
    }

    fn start_clock(&mut self) {
        let accepted_at = Instant::now();
        self.accepted_at = Some(accepted_at);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let seconds = self.seconds.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        // Checked under the watch lock: once stop_clock has cancelled, the
                        // frozen value it publishes is the last one.
                        let published = seconds.send_if_modified(|value| {
                            if cancelled.is_cancelled() {
                                return false;
                            }
                            *value = accepted_at.elapsed().as_secs();
                            true
                        });
                        if !published {
                            break;
                        }
                    }
                }
            }
            trace!("call duration ticker stopped");
        });
        self.ticker = Some(token);
    }

    pub(crate) fn stop_clock(&mut self) {
        if let Some(token) = self.ticker.take() {
            token.cancel();
        }
        if self.frozen.is_none() {
            let frozen = self.duration();
            self.frozen = Some(frozen);
            self.seconds.send_replace(frozen.as_secs());
        }
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        if let Some(token) = self.ticker.take() {
            token.cancel();
        }
    }
}
