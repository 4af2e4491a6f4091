use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::call::{ActiveCall, CallEvent, CallSnapshot};
use super::token_source::{TokenError, TokenSource};
use super::ClientError;
use crate::utils::normalize_phone_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Offline,
    Connecting,
    Ready,
    Busy,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SdkError(pub String);

/// Parameters forwarded to the voice webhook when the SDK connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub to: String,
    pub call_record_id: Uuid,
}

/// The provider's client SDK, driven by [`Device`]. Events it raises are fed back through
/// [`Device::handle_event`].
#[async_trait]
pub trait VoiceSdk: Send {
    /// Construct the underlying device with `token` and wire its event handlers.
    async fn setup(&mut self, token: &str) -> Result<(), SdkError>;
    async fn register(&mut self) -> Result<(), SdkError>;
    fn update_token(&mut self, token: &str);
    async fn connect(&mut self, params: ConnectParams) -> Result<(), SdkError>;
    fn disconnect(&mut self);
    fn mute(&mut self, muted: bool);
    fn reject_incoming(&mut self, call_id: &str);
    fn destroy(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Registered,
    RegistrationError(String),
    TokenWillExpire,
    Incoming { call_id: String },
    Call(CallEvent),
}

/// Things the user has to be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceNotice {
    SessionExpired,
    NotConfigured(String),
    RegistrationFailed(String),
    CallFailed(String),
    Unavailable(String),
}

impl From<&TokenError> for DeviceNotice {
    fn from(e: &TokenError) -> Self {
        match e {
            TokenError::NoSession | TokenError::SessionExpired => DeviceNotice::SessionExpired,
            TokenError::NotConfigured(msg) => DeviceNotice::NotConfigured(msg.clone()),
            TokenError::Transport(msg) => DeviceNotice::Unavailable(msg.clone()),
        }
    }
}

pub struct Device<S, T> {
    sdk: S,
    tokens: T,
    status: DeviceStatus,
    initialized: bool,
    call: Option<ActiveCall>,
    last_call: Option<CallSnapshot>,
    notices: mpsc::UnboundedSender<DeviceNotice>,
    seconds: Arc<watch::Sender<u64>>,
}

impl<S: VoiceSdk, T: TokenSource> Device<S, T> {
    pub fn new(sdk: S, tokens: T) -> (Self, mpsc::UnboundedReceiver<DeviceNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let (seconds, _) = watch::channel(0);
        let device = Self {
            sdk,
            tokens,
            status: DeviceStatus::Offline,
            initialized: false,
            call: None,
            last_call: None,
            notices,
            seconds: Arc::new(seconds),
        };
        (device, rx)
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn active_call(&self) -> Option<&ActiveCall> {
        self.call.as_ref()
    }

    pub fn last_call(&self) -> Option<&CallSnapshot> {
        self.last_call.as_ref()
    }

    pub fn is_muted(&self) -> bool {
        self.call.as_ref().map_or(false, ActiveCall::is_muted)
    }

    /// Duration of the active call, or of the last one once it has ended.
    pub fn call_duration(&self) -> Duration {
        match (&self.call, &self.last_call) {
            (Some(call), _) => call.duration(),
            (None, Some(last)) => last.duration,
            (None, None) => Duration::ZERO,
        }
    }

    /// Whole seconds of the active call, updated once a second while it is connected.
    pub fn subscribe_duration(&self) -> watch::Receiver<u64> {
        self.seconds.subscribe()
    }

    /// Fetch a token, set up the SDK and start registration. A no-op once initialized; after a
    /// failure the device is offline and this may be called again.
    pub async fn initialize(&mut self) -> Result<(), ClientError> {
        if self.initialized {
            debug!("device already initialized");
            return Ok(());
        }
        self.status = DeviceStatus::Connecting;

        let token = match self.tokens.fetch_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("could not fetch voice token: {e}");
                self.go_offline(DeviceNotice::from(&e));
                return Err(e.into());
            }
        };
        if let Err(e) = self.sdk.setup(&token.token).await {
            warn!("voice sdk setup failed: {e}");
            self.go_offline(DeviceNotice::RegistrationFailed(e.to_string()));
            return Err(e.into());
        }
        self.initialized = true;

        if let Err(e) = self.sdk.register().await {
            warn!("device registration failed: {e}");
            self.release();
            self.go_offline(DeviceNotice::RegistrationFailed(e.to_string()));
            return Err(e.into());
        }
        info!(identity=%token.identity, "device registering");
        Ok(())
    }

    pub async fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Registered => {
                if self.status == DeviceStatus::Connecting {
                    self.status = DeviceStatus::Ready;
                    info!("device ready");
                }
            }
            DeviceEvent::RegistrationError(msg) => {
                warn!("registration error: {msg}");
                self.release();
                self.go_offline(DeviceNotice::RegistrationFailed(msg));
            }
            DeviceEvent::TokenWillExpire => self.refresh_token().await,
            DeviceEvent::Incoming { call_id } => {
                debug!(%call_id, "rejecting incoming call");
                self.sdk.reject_incoming(&call_id);
            }
            DeviceEvent::Call(event) => self.handle_call_event(event),
        }
    }

    async fn refresh_token(&mut self) {
        if !self.initialized {
            return;
        }
        match self.tokens.fetch_token().await {
            Ok(token) => {
                debug!("voice token refreshed");
                self.sdk.update_token(&token.token);
            }
            Err(e) => {
                warn!("voice token refresh failed: {e}");
                self.release();
                self.go_offline(DeviceNotice::from(&e));
            }
        }
    }

    fn handle_call_event(&mut self, event: CallEvent) {
        let Some(call) = self.call.as_mut() else {
            debug!(?event, "call event without an active call");
            return;
        };
        let Some(next) = call.apply(&event) else {
            debug!(?event, status=%call.status(), "ignoring call event");
            return;
        };
        debug!(status=%next, "call transition");
        if next.is_terminal() {
            if let CallEvent::Error(msg) = &event {
                self.notify(DeviceNotice::CallFailed(msg.clone()));
            }
            self.finish_call();
        }
    }

    /// Place a call. Only allowed while ready; the call is `initiated` before the SDK is asked
    /// to connect.
    pub async fn make_call(&mut self, number: &str, call_record_id: Uuid) -> Result<(), ClientError> {
        if self.status != DeviceStatus::Ready {
            return Err(ClientError::NotReady(self.status));
        }
        let to = normalize_phone_number(number).ok_or(ClientError::InvalidNumber)?;

        self.status = DeviceStatus::Busy;
        self.call = Some(ActiveCall::new(call_record_id, to.clone(), self.seconds.clone()));

        let params = ConnectParams { to, call_record_id };
        if let Err(e) = self.sdk.connect(params).await {
            warn!("connect failed: {e}");
            if let Some(call) = self.call.as_mut() {
                call.apply(&CallEvent::Error(e.to_string()));
            }
            self.notify(DeviceNotice::CallFailed(e.to_string()));
            self.finish_call();
            return Err(e.into());
        }
        Ok(())
    }

    /// Flip mute on the active call. Returns the new mute state; `false` with no call.
    pub fn toggle_mute(&mut self) -> bool {
        let Some(call) = self.call.as_mut() else {
            return false;
        };
        let muted = !call.is_muted();
        call.set_muted(muted);
        self.sdk.mute(muted);
        muted
    }

    /// Ask the SDK to end the active call. The terminal state arrives as a `Disconnect` event.
    pub fn hang_up(&mut self) {
        if self.call.is_some() {
            self.sdk.disconnect();
        }
    }

    /// Stop timers, release the SDK and go offline. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(mut call) = self.call.take() {
            call.stop_clock();
            self.last_call = Some(call.snapshot());
        }
        self.release();
        self.status = DeviceStatus::Offline;
    }

    fn finish_call(&mut self) {
        if let Some(mut call) = self.call.take() {
            call.stop_clock();
            self.last_call = Some(call.snapshot());
        }
        if self.status == DeviceStatus::Busy {
            self.status = DeviceStatus::Ready;
        }
    }

    fn release(&mut self) {
        if self.initialized {
            self.sdk.destroy();
            self.initialized = false;
        }
    }

    fn go_offline(&mut self, notice: DeviceNotice) {
        if let Some(mut call) = self.call.take() {
            call.apply(&CallEvent::Cancel);
            self.last_call = Some(call.snapshot());
        }
        self.status = DeviceStatus::Offline;
        self.notify(notice);
    }

    fn notify(&self, notice: DeviceNotice) {
        // receiver gone means nobody is showing notices
        let _ = self.notices.send(notice);
    }
}
