//! Client side of outbound calling: the registered voice device and the call it is running.
//!
//! The provider SDK and the backend token endpoint are reached through the [`VoiceSdk`] and
//! [`TokenSource`] traits. SDK callbacks are delivered to [`Device::handle_event`] from one task;
//! nothing here blocks.

mod call;
mod device;
mod token_source;

pub use call::{transition, ActiveCall, CallEvent, CallSnapshot};
pub use device::{ConnectParams, Device, DeviceEvent, DeviceNotice, DeviceStatus, SdkError, VoiceSdk};
pub use token_source::{
    HttpTokenSource, Session, SessionProvider, TokenError, TokenSource, VoiceToken,
    TOKEN_FETCH_TIMEOUT,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("device is {0:?}, not ready to place a call")]
    NotReady(DeviceStatus),
    #[error("not a valid phone number")]
    InvalidNumber,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Sdk(#[from] SdkError),
}
