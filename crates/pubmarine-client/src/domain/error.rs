//! Client error types.
//!
//! Decode and validation failures never leave the dispatcher; everything
//! else is surfaced to the caller that triggered it.

use crate::domain::correlation::EnvelopeId;
use std::time::Duration;

/// Transport adapter failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Send attempted before the open notification or after close
    #[error("transport not open")]
    NotOpen,

    /// Connection could not be established
    #[error("connect failed: {0}")]
    Connect(String),

    /// Underlying I/O failure while sending or closing
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Envelope codec failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload is not well-formed JSON
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Payload is JSON but not a valid envelope
    #[error("validation error: {0}")]
    Validation(String),

    /// Outgoing envelope could not be serialized
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_syntax() || e.is_eof() || e.is_io() {
            CodecError::Decode(e)
        } else {
            CodecError::Validation(e.to_string())
        }
    }
}

/// Pending-call registry failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A call with this id is already pending
    #[error("duplicate pending id: {0}")]
    DuplicateId(EnvelopeId),
}

/// Terminal outcomes other than a reply, delivered through the continuation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// No reply arrived before the request deadline
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    /// Connection went away while the call was pending
    #[error("connection closed{}", .0.as_deref().map(|c| format!(": {}", c)).unwrap_or_default())]
    ConnectionClosed(Option<String>),
}

/// Errors returned to callers of [`crate::Client`]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Config(#[from] crate::domain::config::ConfigError),
}

impl ClientError {
    /// True when the failure is a send outside the open window.
    pub fn is_not_open(&self) -> bool {
        matches!(self, ClientError::Transport(TransportError::NotOpen))
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
