//! Error types for moveref.
//!
//! All errors are strongly typed using thiserror so that the lifecycle code can
//! tell an authentication failure apart from a missing capability or a
//! transient backend failure, and log each one by kind.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the repository boundary (sessions, observation, resolvers).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Login failed for service identity '{identity}': {reason}")]
    LoginFailed {
        identity: String,
        reason: String,
    },

    #[error("Unsupported repository operation: {operation}")]
    UnsupportedOperation {
        operation: String,
    },

    #[error("Listener registration not found: {registration}")]
    RegistrationNotFound {
        registration: String,
    },

    #[error("Repository backend error: {message}")]
    Backend {
        message: String,
    },

    #[error("Repository {what} is closed")]
    Closed {
        what: String,
    },
}

impl RepositoryError {
    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true if this error means the privileged session could not be acquired.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::LoginFailed { .. })
    }

    /// Returns true if the backend lacks the requested capability.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedOperation { .. })
    }

    /// Returns true if this error only concerns the operation that raised it.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Closed { .. })
    }
}

/// Errors raised when handing a job to the dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Job queue for topic '{topic}' is full (capacity {capacity})")]
    QueueFull {
        topic: String,
        capacity: usize,
    },

    #[error("Job queue for topic '{topic}' is disconnected")]
    Disconnected {
        topic: String,
    },

    #[error("Invalid job topic '{topic}'")]
    InvalidTopic {
        topic: String,
    },
}

/// Errors loading or validating [`crate::config::ListenerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config field '{field}': {reason}")]
    Invalid {
        field: String,
        reason: String,
    },
}

/// Top-level error type for moveref.
#[derive(Debug, Error)]
pub enum MoveRefError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MoveRefError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if a later attempt at the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Repository(e) => e.is_transient(),
            Self::Dispatch(e) => matches!(e, DispatchError::QueueFull { .. }),
            Self::Config(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for moveref operations.
pub type MoveRefResult<T> = Result<T, MoveRefError>;
