//! Manifest errors.

use thiserror::Error;

pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("invalid yaml: {0}")]
    Yaml(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("required env: {}", keys.join(", "))]
    MissingEnv { keys: Vec<String> },

    #[error("service {service} links to undeclared service {link}")]
    UnknownLink { service: String, link: String },

    #[error("no such service: {0}")]
    NoSuchService(String),

    #[error("invalid scale: {0}")]
    InvalidScale(String),

    #[error("{0}")]
    Validation(String),
}
