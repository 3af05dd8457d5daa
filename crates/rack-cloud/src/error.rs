//! Error types shared by every cloud collaborator.

use thiserror::Error;

/// Result type alias for cloud API calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Structural cloud errors. Provider adapters translate their SDK error
/// codes into these variants so callers can branch without string matching.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The target is busy with an operation that must finish first
    /// (a service with active deployments, a stack mid-update).
    #[error("in progress: {0}")]
    InProgress(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("throttled: {0}")]
    Throttled(String),

    /// A sequenced write was rejected; retry with `next`.
    #[error("invalid sequence token, expected {next}")]
    InvalidToken { next: String },

    #[error("{code}: {message}")]
    Api { code: String, message: String },
}

impl CloudError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, CloudError::InProgress(_))
    }

    pub fn code(&self) -> &str {
        match self {
            CloudError::NotFound(_) => "NotFound",
            CloudError::InProgress(_) => "InProgress",
            CloudError::Conflict(_) => "Conflict",
            CloudError::Throttled(_) => "Throttled",
            CloudError::InvalidToken { .. } => "InvalidSequenceToken",
            CloudError::Api { code, .. } => code,
        }
    }

    /// The human-readable part of the error, without the code.
    pub fn message(&self) -> String {
        match self {
            CloudError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
