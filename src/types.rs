//! Error types for MASH

use hyper::StatusCode;

/// Main error type for world operations
#[derive(Debug, thiserror::Error)]
pub enum MashError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authorisation(String),

    #[error("{0}")]
    Lookup(String),

    #[error("{0}")]
    Policy(String),

    #[error("{0}")]
    State(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MashError {
    /// Convert error to HTTP status code
    ///
    /// Validation/authorisation/lookup/state errors surface as 200 with an
    /// `{error}` result payload; only transport and policy errors carry a
    /// non-200 status.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Policy(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }

    /// Whether this error belongs in a handler's `{error}` result payload
    /// rather than an HTTP-level failure.
    pub fn is_result_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Authorisation(_)
                | Self::Lookup(_)
                | Self::State(_)
        )
    }
}

impl From<rusqlite::Error> for MashError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for MashError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for MashError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<hyper::Error> for MashError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

/// Result type alias for world operations
pub type Result<T> = std::result::Result<T, MashError>;
