//! OBS error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::status;

/// OBS control error type.
#[derive(Debug, Error)]
pub enum ObsError {
    #[error("Not connected to OBS")]
    NotConnected,

    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("OBS scene graph not ready after {}ms", waited.as_millis())]
    NotReady { waited: Duration },

    #[error("OBS is not ready ({code}): {message}")]
    Transient { code: u16, message: String },

    #[error("Resource already exists ({code}): {message}")]
    Conflict { code: u16, message: String },

    #[error("Missing required asset for {role}: {}", path.display())]
    MissingAsset { role: String, path: PathBuf },

    #[error("Input {name} exists with kind {actual}, expected {expected}")]
    KindMismatch { name: String, expected: String, actual: String },

    #[error("OBS request failed ({code}): {message}")]
    Remote { code: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ObsError {
    /// Classify a failed request status.
    #[must_use]
    pub fn from_status(code: u16, comment: Option<String>) -> Self {
        let message = comment.unwrap_or_else(|| format!("request failed with status {code}"));
        match code {
            status::NOT_READY => Self::Transient { code, message },
            status::RESOURCE_ALREADY_EXISTS => Self::Conflict { code, message },
            _ => Self::Remote { code, message },
        }
    }

    /// Whether the retry policy may absorb this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::NotReady { .. })
    }

    /// Whether this is an "already exists" failure.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Remote status code, when the error came from OBS.
    #[must_use]
    pub fn remote_code(&self) -> Option<u16> {
        match self {
            Self::Transient { code, .. } | Self::Conflict { code, .. } | Self::Remote { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// Stable numeric code for callers.
    ///
    /// Remote failures keep the OBS status code; local failures use the
    /// 1000 range so they never collide with it.
    #[must_use]
    pub fn code(&self) -> i32 {
        if let Some(code) = self.remote_code() {
            return i32::from(code);
        }
        match self {
            Self::NotConnected => 1001,
            Self::AlreadyConnecting => 1002,
            Self::NotReady { .. } => 1003,
            Self::MissingAsset { .. } => 1004,
            Self::KindMismatch { .. } => 1005,
            Self::Transport(_) => 1006,
            Self::Auth(_) => 1007,
            Self::Protocol(_) => 1008,
            Self::InvalidArgument(_) => 1009,
            Self::Json(_) => 1010,
            Self::Transient { .. } | Self::Conflict { .. } | Self::Remote { .. } => 1000,
        }
    }

    /// Lowercased message text, for matching remote comments.
    pub(crate) fn message_lower(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }
}

impl From<autocaster_core::Error> for ObsError {
    fn from(err: autocaster_core::Error) -> Self {
        match err {
            autocaster_core::Error::MissingAsset { role, path } => Self::MissingAsset { role, path },
            autocaster_core::Error::SerializationError(e) => Self::Json(e),
            other => Self::InvalidArgument(other.to_string()),
        }
    }
}

/// Result type for OBS operations.
pub type ObsResult<T> = Result<T, ObsError>;
