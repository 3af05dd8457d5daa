//! Error types for template synthesis.

use rack_manifest::ManifestError;
use thiserror::Error;

pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("service {0} has neither an image nor a build")]
    NoImage(String),

    #[error("invalid template: {0}")]
    Invalid(String),
}
