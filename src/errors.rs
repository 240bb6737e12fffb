//! Log Watching Error Hierarchy
//!
//! Defines the error types surfaced by the watch subsystem, categorized by where
//! the failure originates: acquiring a log source, reading from an open stream,
//! or the internal bookkeeping of watches.

use std::path::PathBuf;

use config::ConfigError;

use crate::ContainerKey;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Watch lifecycle failures (source acquisition, registry bookkeeping)
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Local file system failures (log directory, log file)
    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A single retry attempt exceeded its timeout
    #[error("Retry timeout")]
    RetryTimeoutError,

    /// Retry policy exhaustion
    #[error("{0}")]
    RetryTaskFailed(String),

    #[error("{0}")]
    SignalSenderClosed(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchError {
    /// The container could not be reached; no watch was created
    #[error("Log source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    /// An open log stream failed while reading
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A watch was found without listeners outside of its teardown window
    #[error("Watch registry inconsistent for {key}: {detail}")]
    RegistryInconsistency { key: ContainerKey, detail: String },

    /// `start` was called after the watch log was shut down
    #[error("Watch log is shutting down")]
    ShuttingDown,
}

/// Failure to open a log stream for a container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Pod or container does not exist
    #[error("{key} not found: {message}")]
    NotFound { key: ContainerKey, message: String },

    /// Container exists but is not producing logs yet (waiting, image pull, ...)
    #[error("{key} is not running: {message}")]
    NotRunning { key: ContainerKey, message: String },

    /// The API server refused access to the pod or its logs
    #[error("Permission denied for {key}: {message}")]
    PermissionDenied { key: ContainerKey, message: String },

    /// API server unreachable or any other failure while opening the stream
    #[error("Log source for {key} unavailable: {message}")]
    Unavailable { key: ContainerKey, message: String },
}

impl SourceError {
    /// HTTP-like status code describing the failure, used when reporting the
    /// failure to listeners.
    pub fn status_code(&self) -> u16 {
        match self {
            SourceError::NotFound { .. } => 404,
            SourceError::NotRunning { .. } => 400,
            SourceError::PermissionDenied { .. } => 403,
            SourceError::Unavailable { .. } => 503,
        }
    }

    pub fn key(&self) -> &ContainerKey {
        match self {
            SourceError::NotFound { key, .. }
            | SourceError::NotRunning { key, .. }
            | SourceError::PermissionDenied { key, .. }
            | SourceError::Unavailable { key, .. } => key,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SourceError::NotFound { message, .. }
            | SourceError::NotRunning { message, .. }
            | SourceError::PermissionDenied { message, .. }
            | SourceError::Unavailable { message, .. } => message,
        }
    }
}

/// Read failure on an open log stream.
///
/// Never returned from `start`/`stop`; it becomes the watch's stop reason and is
/// handed to listeners through [`crate::LogListener::on_error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Log stream for {key} failed (code {code}): {message}")]
pub struct StreamError {
    pub key: ContainerKey,
    pub code: u16,
    pub message: String,
}

impl StreamError {
    pub fn new(
        key: ContainerKey,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key,
            code: 500,
            message: message.into(),
        }
    }
}

impl From<&SourceError> for StreamError {
    fn from(e: &SourceError) -> Self {
        StreamError {
            key: e.key().clone(),
            code: e.status_code(),
            message: e.message().to_string(),
        }
    }
}

// ============== Conversion Implementations ============== //
impl From<SourceError> for Error {
    fn from(e: SourceError) -> Self {
        Error::Watch(WatchError::SourceUnavailable(e))
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Error::Watch(WatchError::Stream(e))
    }
}

impl Error {
    /// Whether the error is a source acquisition failure worth retrying.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, Error::Watch(WatchError::SourceUnavailable(_)))
    }

    /// Errors that no retry can fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Watch(WatchError::ShuttingDown)
                | Error::Watch(WatchError::RegistryInconsistency { .. })
                | Error::Fatal(_)
        )
    }
}
