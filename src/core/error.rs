//! Error types for the core module.

use patchwise_core::ErrorKind;
use patchwise_core::approval::ApprovalError;

/// Core error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure inside the change pipeline.
    #[error(transparent)]
    Pipeline(#[from] patchwise_core::Error),

    /// The approval channel went away.
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Classify for user-facing reporting.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Pipeline(e) => e.kind(),
            Self::Task(_) => ErrorKind::Transport,
            Self::Approval(_) => ErrorKind::Apply,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
