use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

use crate::models::object::ObjectId;

/// Failures raised by the chunk store, the object index and the blob service.
///
/// Backend errors from either store collapse into `StoreUnavailable` and are
/// passed up unchanged; the caller decides whether to retry.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unsupported file type for `{0}`, expected .jpg, .jpeg or .png")]
    UnsupportedType(String),
    #[error("object `{0}` not found")]
    NotFound(ObjectId),
    #[error("chunk `{0}` is missing from the chunk store")]
    ChunkMissing(String),
    #[error("storage unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to read upload payload: {0}")]
    Payload(#[source] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Whether this is a server-side fault rather than a bad request.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            StorageError::ChunkMissing(_) | StorageError::StoreUnavailable(_)
        )
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::StoreUnavailable(Box::new(err))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::StoreUnavailable(Box::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::StoreUnavailable(Box::new(err))
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "msg": self.message,
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::UnsupportedType(_) => AppError::bad_request("Invalid file type"),
            StorageError::Payload(_) => AppError::bad_request(err.to_string()),
            StorageError::NotFound(_) => AppError::not_found("Image not found"),
            StorageError::ChunkMissing(_) | StorageError::StoreUnavailable(_) => {
                tracing::error!(error = %err, "storage fault");
                AppError::internal(err.to_string())
            }
        }
    }
}
