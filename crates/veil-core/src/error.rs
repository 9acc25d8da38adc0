use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no access")]
    NoAccess,
    #[error("missing key metadata")]
    MissingKeyMetadata,
    #[error("storage")]
    Storage,
    #[error("validation {0}")]
    Validation(String),
}
