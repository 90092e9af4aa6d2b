//! Pipeline error types.

/// Errors raised by the change pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// LLM configuration failed its validity check.
    #[error("invalid LLM configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level error (connection, TLS, stream decoding).
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The completion response carried no choices.
    #[error("no choices returned")]
    NoChoices,

    /// The first choice had neither text content nor a function call.
    #[error("no content or function call")]
    NoContent,

    /// LLM output could not be understood.
    #[error("could not parse LLM response: {0}")]
    Protocol(String),

    /// No JSON array delimiters were present in the output.
    #[error("no valid JSON array found")]
    NoJsonArray,

    /// The request was interrupted while waiting on the LLM.
    #[error("request interrupted")]
    Cancelled,

    /// The client was closed before the call was issued.
    #[error("client is closed")]
    Closed,

    /// Document mutation failed.
    #[error("failed to apply change: {0}")]
    Apply(String),
}

/// Coarse classification used when reporting errors to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid configuration.
    Configuration,
    /// Network or provider failure.
    Transport,
    /// Output the pipeline could not understand.
    Protocol,
    /// User-initiated interruption.
    Cancellation,
    /// Mutation of the document failed.
    Apply,
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::Transport(_) | Self::Http(_) | Self::Api { .. } | Self::Closed => {
                ErrorKind::Transport
            }
            Self::NoChoices | Self::NoContent | Self::Protocol(_) | Self::NoJsonArray => {
                ErrorKind::Protocol
            }
            Self::Cancelled => ErrorKind::Cancellation,
            Self::Apply(_) => ErrorKind::Apply,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
