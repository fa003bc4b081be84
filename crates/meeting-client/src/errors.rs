//! Meeting client error types.
//!
//! Each layer has its own error enum. Everything converges on `ClientError`,
//! which the session surfaces to callers. Internal details are logged but
//! `user_message()` never exposes them.

use crate::config::ConfigError;

use common::types::{MediaKind, ProducerId};
use thiserror::Error;

/// Media device access errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The user or the OS refused access to the device.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No matching hardware is present or it is in use elsewhere.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The display picker was dismissed.
    #[error("Capture cancelled by user")]
    UserCancelled,
}

/// Signaling channel errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The request was never acknowledged.
    #[error("Signaling request timed out: {0}")]
    Timeout(String),

    /// The server answered with an error.
    #[error("Signaling request {method} rejected: {message}")]
    Rejected { method: String, message: String },

    /// A payload did not match the expected shape.
    #[error("Invalid {context} payload: {message}")]
    InvalidPayload { context: String, message: String },

    /// The signaling connection is gone.
    #[error("Signaling channel disconnected")]
    Disconnected,
}

impl SignalingError {
    pub(crate) fn invalid(context: &str, message: impl ToString) -> Self {
        SignalingError::InvalidPayload {
            context: context.to_string(),
            message: message.to_string(),
        }
    }
}

/// Errors raised by the SFU client library.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SfuError {
    /// The transport or handle was already closed.
    #[error("SFU handle closed: {0}")]
    Closed(String),

    /// The library rejected the operation.
    #[error("SFU operation failed: {0}")]
    Failed(String),
}

/// Meeting client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Media device access refused (user-recoverable).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No usable media hardware.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Screen picker dismissed.
    #[error("Capture cancelled by user")]
    UserCancelled,

    /// DTLS/ICE or transport setup failure.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// A signaling request was never acknowledged.
    #[error("Signaling timeout: {0}")]
    SignalingTimeout(String),

    /// Any other signaling failure.
    #[error("Signaling error: {0}")]
    Signaling(SignalingError),

    /// Consuming one remote producer failed.
    #[error("Consume failed for producer {producer_id}: {reason}")]
    ConsumeFailure {
        producer_id: ProducerId,
        reason: String,
    },

    /// Another start/stop for this kind is still in flight.
    #[error("A {0} transition is already in progress")]
    KindBusy(MediaKind),

    /// The kind is already being produced.
    #[error("{0} is already active")]
    AlreadyActive(MediaKind),

    /// Operation not valid in the current session state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// The session actor has exited.
    #[error("Session has ended")]
    SessionEnded,

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns a bounded label for logs and metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::PermissionDenied(_) => "permission_denied",
            ClientError::DeviceUnavailable(_) => "device_unavailable",
            ClientError::UserCancelled => "user_cancelled",
            ClientError::TransportFailure(_) => "transport_failure",
            ClientError::SignalingTimeout(_) => "signaling_timeout",
            ClientError::Signaling(_) => "signaling",
            ClientError::ConsumeFailure { .. } => "consume_failure",
            ClientError::KindBusy(_) | ClientError::AlreadyActive(_) => "kind_conflict",
            ClientError::InvalidState { .. } => "invalid_state",
            ClientError::SessionEnded => "session_ended",
            ClientError::Config(_) => "config",
        }
    }

    /// Whether the user can fix this by retrying (e.g. granting permission).
    #[must_use]
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::PermissionDenied(_) | ClientError::UserCancelled
        )
    }

    /// Returns a user-facing message (no internal details).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ClientError::PermissionDenied(_) => {
                "Allow access to your microphone and camera to join the call".to_string()
            }
            ClientError::DeviceUnavailable(_) => "No camera or microphone was found".to_string(),
            ClientError::UserCancelled => "Screen sharing was cancelled".to_string(),
            ClientError::TransportFailure(_) => "Connection to the call was lost".to_string(),
            ClientError::SignalingTimeout(_) | ClientError::Signaling(_) => {
                "The server did not respond, please try again".to_string()
            }
            ClientError::ConsumeFailure { .. } => {
                "Could not receive a participant's media".to_string()
            }
            ClientError::KindBusy(kind) | ClientError::AlreadyActive(kind) => {
                format!("Your {kind} is already being updated")
            }
            ClientError::InvalidState { .. } | ClientError::SessionEnded => {
                "The call is no longer active".to_string()
            }
            ClientError::Config(_) => "The meeting client is misconfigured".to_string(),
        }
    }
}

impl From<MediaError> for ClientError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied(msg) => ClientError::PermissionDenied(msg),
            MediaError::DeviceUnavailable(msg) => ClientError::DeviceUnavailable(msg),
            MediaError::UserCancelled => ClientError::UserCancelled,
        }
    }
}

impl From<SignalingError> for ClientError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::Timeout(method) => ClientError::SignalingTimeout(method),
            other => ClientError::Signaling(other),
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<SfuError> for ClientError {
    fn from(err: SfuError) -> Self {
        ClientError::TransportFailure(err.to_string())
    }
}
