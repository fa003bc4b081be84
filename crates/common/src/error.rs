//! Common error types for meeting client components.

use thiserror::Error;

/// Errors raised while validating shared data types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A required identifier was empty.
    #[error("Missing identifier: {0}")]
    EmptyId(&'static str),

    /// A media kind string was not one of audio, video or screen.
    #[error("Unknown media kind: {0}")]
    UnknownKind(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
