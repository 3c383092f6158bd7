//! Error types for credential operations

/// Errors from credential persistence and parsing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid refresh response: {0}")]
    InvalidRefreshResponse(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
