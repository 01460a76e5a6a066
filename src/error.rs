use std::{io, path::PathBuf};

use thiserror::Error;
use validator::ValidationErrors;

/// Errors raised by the session layer when reading or writing room state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The session is not connected to an active room.
    #[error("not in an active room")]
    NotInRoom,
    /// The replicated store rejected or failed the operation.
    #[error("session unavailable: {message}")]
    Unavailable {
        /// Backend supplied description of the failure.
        message: String,
    },
}

impl SessionError {
    /// Construct an unavailable error from any backend description.
    pub fn unavailable(message: impl Into<String>) -> Self {
        SessionError::Unavailable {
            message: message.into(),
        }
    }
}

/// Errors that abort a single seeker selection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// No live peer could be chosen.
    #[error("peer pool is empty")]
    EmptyPool,
    /// Reading the last seeker or writing the assignment failed.
    #[error("room store access failed: {0}")]
    Store(#[from] SessionError),
}

/// Errors that can occur while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config at {path}")]
    Read {
        /// Location that was attempted.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },
    /// The file is not valid JSON for [`crate::config::AppConfig`].
    #[error("failed to parse config")]
    Parse(#[from] serde_json::Error),
    /// The file parsed but holds out-of-range values.
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationErrors),
}
