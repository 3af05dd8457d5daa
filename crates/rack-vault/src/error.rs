//! Error types for the env vault.

use rack_cloud::CloudError;
use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// The envelope was malformed, tampered with, or sealed under another key.
    #[error("decrypt failed: {0}")]
    DecryptFailed(String),

    #[error("encrypt failed: {0}")]
    EncryptFailed(String),

    #[error("invalid env format, expecting key=value: `{0}`")]
    InvalidLine(String),

    #[error("app {0} has no settings bucket")]
    NoSettings(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}
