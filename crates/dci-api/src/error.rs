//! API error handling.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::error;

/// API error type, rendered as `{status_code, message, payload?}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest {
        message: String,
        payload: Option<Value>,
    },
    Unauthorized(String),
    Conflict(String),
    PreconditionFailed(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, payload) = match self {
            ApiError::BadRequest { message, payload } => (message, payload),
            ApiError::Internal(msg) => {
                error!(error = %msg, "internal error");
                ("internal server error".to_string(), None)
            }
            ApiError::NotFound(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Conflict(msg)
            | ApiError::PreconditionFailed(msg) => (msg, None),
        };

        let mut body = json!({
            "status_code": status.as_u16(),
            "message": message,
        });
        if let Some(payload) = payload {
            body["payload"] = payload;
        }

        (status, Json(body)).into_response()
    }
}

impl From<dci_core::Error> for ApiError {
    fn from(err: dci_core::Error) -> Self {
        match err {
            dci_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            dci_core::Error::PreconditionFailed(msg) => ApiError::PreconditionFailed(msg),
            dci_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            dci_core::Error::BadRequest { message, payload } => {
                ApiError::BadRequest { message, payload }
            }
            dci_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            dci_core::Error::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<dci_db::DbError> for ApiError {
    fn from(err: dci_db::DbError) -> Self {
        dci_core::Error::from(err).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            message: "Invalid JSON body".to_string(),
            payload: Some(json!({ "error": rejection.body_text() })),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest {
            message: "Invalid query string".to_string(),
            payload: Some(json!({ "error": rejection.body_text() })),
        }
    }
}
