use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a call to the REST backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend rejected the credentials (401 or 403). The session has
    /// already been invalidated when this is returned.
    #[error("Not authorized ({0})")]
    Unauthorized(StatusCode),

    #[error("Request to {url} failed with status {status}")]
    Status { status: StatusCode, url: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}
