//! Error types for custom-resource handling.

use rack_cloud::CloudError;
use rack_vault::VaultError;
use thiserror::Error;

pub type FormationResult<T> = Result<T, FormationError>;

#[derive(Debug, Error)]
pub enum FormationError {
    #[error("unknown ResourceType: {0}")]
    UnknownResourceType(String),

    #[error("unknown RequestType: {0}")]
    UnknownRequestType(String),

    #[error("invalid properties: {0}")]
    Properties(String),

    #[error("invalid message: {0}")]
    Message(String),

    #[error("{0}")]
    Failed(String),

    #[error("certificate: {0}")]
    Certificate(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("response: {0}")]
    Response(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}
