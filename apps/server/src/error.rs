//! HTTP error mapping for the Lifeboat boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use lifeboat_core::errors::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict {
        message: String,
        active_session_id: Option<String>,
    },
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(message) => Self::BadRequest(message),
            Error::Authorization(message) => Self::Unauthorized(message),
            Error::SessionNotFound(session_id) => {
                Self::NotFound(format!("restore session '{session_id}' not found"))
            }
            Error::RestoreInProgress { active_session_id } => Self::Conflict {
                message: format!(
                    "restore session '{active_session_id}' is already in progress"
                ),
                active_session_id: Some(active_session_id),
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, json!({ "error": message })),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            Self::Conflict {
                message,
                active_session_id,
            } => (
                StatusCode::CONFLICT,
                json!({ "error": message, "active_session_id": active_session_id }),
            ),
            Self::Internal(message) => {
                error!("internal error: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
