// Error taxonomy shared by the network access layer
use crate::domain::events::ConnectionState;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid transport state: {0}")]
    InvalidState(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Unreachable(_) | TransportError::Timeout)
    }
}

/// Cloneable so every caller joined on one refresh receives the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    NoRefreshToken,
    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("authentication expired, log in again")]
    AuthExhausted,
    #[error("request failed with status {status}: {message}")]
    Application { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("response carried no data")]
    EmptyPayload,
    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl ApiError {
    /// Network trouble the user may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(e) if e.is_retryable())
    }

    /// Failures that can only be resolved by logging in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::AuthExhausted)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: ConnectionState,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("live session has been shut down")]
    TornDown,
    #[error(transparent)]
    Stream(#[from] StreamError),
}
