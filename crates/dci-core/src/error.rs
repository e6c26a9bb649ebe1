//! Error types for DCI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// The inputs exist but the combination is not actionable right now.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Stale etag or a concurrent delete; the two are not told apart.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{message}")]
    BadRequest {
        message: String,
        payload: Option<serde_json::Value>,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
            payload: None,
        }
    }

    pub fn bad_request_with(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Error::BadRequest {
            message: message.into(),
            payload: Some(payload),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
