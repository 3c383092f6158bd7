//! Error types for refresh and pipeline operations

use transport::TransportError;

/// Why a refresh attempt failed.
///
/// Internal to the coordinator: all three end the session and collapse to
/// `RequestError::Unauthenticated` at the pipeline boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("refresh transport failure: {0}")]
    TransportFailure(String),
}

impl RefreshError {
    /// Outcome label for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            RefreshError::NoRefreshToken => "no_refresh_token",
            RefreshError::RefreshRejected(_) => "rejected",
            RefreshError::TransportFailure(_) => "transport_failure",
        }
    }
}

/// Errors surfaced to callers of `RequestPipeline::send`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Credentials could not be recovered. The session has already been
    /// cleared and the session-ended sink notified; do not retry.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Non-auth transport failure, passed through unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
