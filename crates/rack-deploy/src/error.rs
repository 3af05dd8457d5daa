//! Error types for the deployment coordinator.

use rack_cloud::CloudError;
use rack_manifest::ManifestError;
use rack_state::StateError;
use rack_template::TemplateError;
use rack_vault::VaultError;
use thiserror::Error;

pub type DeployResult<T> = Result<T, DeployError>;

/// Structural error kinds an outer façade maps onto status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Permission,
    Provider,
    Fatal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Permission => 401,
            ErrorKind::Provider | ErrorKind::Fatal => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("promotion cancelled")]
    Cancelled,

    #[error("promotion watcher failed: {0}")]
    Watcher(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::NotFound(_) => ErrorKind::NotFound,
            DeployError::Validation(_) => ErrorKind::Validation,
            DeployError::Conflict(_) | DeployError::Cancelled => ErrorKind::Conflict,
            DeployError::Watcher(_) => ErrorKind::Fatal,
            DeployError::Manifest(_) => ErrorKind::Validation,
            DeployError::Template(TemplateError::Invalid(_)) => ErrorKind::Fatal,
            DeployError::Template(_) => ErrorKind::Validation,
            DeployError::State(StateError::NotFound(_)) => ErrorKind::NotFound,
            DeployError::State(StateError::AlreadyExists(_) | StateError::InUse(_)) => {
                ErrorKind::Conflict
            }
            DeployError::State(_) => ErrorKind::Provider,
            DeployError::Vault(VaultError::InvalidLine(_)) => ErrorKind::Validation,
            DeployError::Vault(VaultError::Cloud(e)) | DeployError::Cloud(e) => cloud_kind(e),
            DeployError::Vault(_) => ErrorKind::Provider,
        }
    }
}

fn cloud_kind(e: &CloudError) -> ErrorKind {
    match e {
        CloudError::NotFound(_) => ErrorKind::NotFound,
        CloudError::Conflict(_) | CloudError::InProgress(_) => ErrorKind::Conflict,
        _ => ErrorKind::Provider,
    }
}
