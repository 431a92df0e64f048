//! Error types for the audio subsystem.

use thiserror::Error;

/// Audio subsystem error type.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("endpoint error: {0}")]
    Endpoint(String),

    #[error("no usable audio backend: {0}")]
    BackendUnavailable(String),

    #[error("fallback attempt limit reached, cooling down; last failure: {0}")]
    FallbackCoolingDown(String),

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("device is closed")]
    Closed,

    #[error("backend does not support pause")]
    PauseUnsupported,

    #[error("render thread error: {0}")]
    RenderThread(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for audio operations.
pub type Result<T> = std::result::Result<T, AudioError>;

/// Failure signalled by a caller-supplied sample callback.
///
/// The render loops treat this as recoverable: the affected span is
/// zero-filled and playback continues.
#[derive(Error, Debug, Clone)]
#[error("sample callback failed: {0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        CallbackError(msg.into())
    }
}

impl AudioError {
    /// Creates an endpoint error with a custom message.
    pub fn endpoint<S: Into<String>>(msg: S) -> Self {
        AudioError::Endpoint(msg.into())
    }

    /// Creates an invalid format error with a custom message.
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        AudioError::InvalidFormat(msg.into())
    }

    /// Creates an invalid state error with a custom message.
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        AudioError::InvalidState(msg.into())
    }
}
