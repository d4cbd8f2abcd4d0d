//! Error taxonomy shared by every handler.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use markshare_types::api::ErrorBody;
use thiserror::Error;

use crate::password::PasswordError;

const INTERNAL_MESSAGE: &str = "Something went wrong";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input, oversized content, weak password.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    /// A verification or reset token that does not exist (or was used).
    #[error("{0}")]
    InvalidToken(String),

    #[error("{0}")]
    Expired(String),

    /// The target exists but is not in a state that allows the operation.
    #[error("{0}")]
    InvalidState(String),

    /// No session, or the session does not own the resource.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized() -> Self {
        Self::Unauthorized("Unauthorized".into())
    }

    pub fn post_not_found() -> Self {
        Self::NotFound("Post not found".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::Conflict(_)
            | ApiError::InvalidToken(_)
            | ApiError::Expired(_)
            | ApiError::InvalidState(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "server returned 500 status");
                INTERNAL_MESSAGE.to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error })).into_response()
    }
}
