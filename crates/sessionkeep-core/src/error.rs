//! Error types shared by every session component.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Attempted to persist or adopt a pair with one half missing.
    #[error("Invalid token pair: {0}")]
    InvalidTokenPair(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The refresh token was rejected, missing, or retries were exhausted.
    /// The session has been cleared.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Operation timed out")]
    Timeout,

    /// The server kept rejecting the request after a refreshed token was attached.
    #[error("Unauthorized - request rejected after token refresh")]
    Unauthorized,

    /// A login or logout changed the session while this operation was in flight,
    /// so its result was discarded.
    #[error("Session changed while the operation was in flight")]
    Superseded,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::Network(_) | SessionError::Timeout => true,
            SessionError::Api(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidTokenPair(_) => ErrorKind::InvalidTokenPair,
            SessionError::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            SessionError::RefreshFailed(_) | SessionError::Unauthorized => ErrorKind::RefreshFailed,
            SessionError::Network(_) | SessionError::Timeout | SessionError::Api(_) => {
                ErrorKind::Network
            }
            SessionError::Superseded | SessionError::Storage(_) | SessionError::Config(_) => {
                ErrorKind::Storage
            }
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SessionError::Timeout
        } else {
            SessionError::Network(e.to_string())
        }
    }
}

/// Comparable error discriminant recorded in the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidTokenPair,
    Network,
    InvalidCredentials,
    RefreshFailed,
    Storage,
}

pub type SessionResult<T> = Result<T, SessionError>;
