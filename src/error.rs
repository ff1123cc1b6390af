use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::db::StoreError;
use crate::validation::ValidationError;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { .. } => ApiError::NotFound(value.to_string()),
            StoreError::Protected { .. } | StoreError::Duplicate(_) => {
                ApiError::Conflict(value.to_string())
            }
            StoreError::Sqlite(err) => {
                error!("database error: {err}");
                ApiError::Internal("Database error".into())
            }
            StoreError::Poisoned => {
                error!("database lock poisoned");
                ApiError::Internal("Database unavailable".into())
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(value: ValidationError) -> Self {
        match value {
            ValidationError::InvertedRange => ApiError::BadRequest(value.to_string()),
            ValidationError::Conflict(conflict) => ApiError::Conflict(conflict.to_string()),
            ValidationError::Store(err) => err.into(),
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::from(value).into()
    }
}
