//! Error types shared across the coordinator.
//!
//! `CoreError` is the tagged-result type returned by the core subsystems
//! (crypto, catalog, chunk pipeline, lifecycle loops). `AppError` is the HTTP
//! boundary type; it wraps a `CoreError` (or is constructed directly by
//! handlers for request-shape problems) and knows how to render itself as a
//! JSON body with the right status code.

use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

/// Error kinds produced by the core (non-HTTP) subsystems, tagged by the
/// effect they should have at the HTTP boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("catalog busy: {0}")]
    Busy(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("no space available: {0}")]
    NoSpace(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.message().contains("database is locked") => {
                CoreError::Busy(err.to_string())
            }
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".into()),
            other => CoreError::Io(other.to_string()),
        }
    }
}

/// HTTP-facing error. Every handler returns `Result<_, AppError>`.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => AppError::BadRequest(msg),
            CoreError::NotFound(msg) => AppError::NotFound(msg),
            CoreError::Unauthorized(msg) => AppError::Unauthorized(msg),
            CoreError::Busy(msg) => {
                tracing::warn!(details = %msg, "catalog busy, surfacing as internal error");
                AppError::Internal("catalog is busy, please retry".into())
            }
            CoreError::Crypto(msg) => {
                tracing::error!(details = %msg, "crypto error");
                AppError::Internal("an internal error occurred".into())
            }
            CoreError::Corruption(msg) => {
                tracing::error!(details = %msg, "corruption detected");
                AppError::Internal(msg)
            }
            CoreError::NoSpace(msg) => {
                tracing::error!(details = %msg, "no storage space available");
                AppError::Internal(msg)
            }
            CoreError::Io(msg) => {
                tracing::error!(details = %msg, "io error");
                AppError::Internal("an internal error occurred".into())
            }
            CoreError::Invariant(msg) => {
                tracing::error!(details = %msg, "invariant violation");
                AppError::Internal("an internal error occurred".into())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {}", err);
        AppError::Internal("an internal error occurred".into())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("database error: {}", err);
        AppError::Internal("an internal error occurred".into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

/// Strip a client-supplied filename down to a safe on-disk component: no
/// separators, no traversal, no null bytes.
pub fn safe_filename(name: &str) -> Result<String, AppError> {
    if name.is_empty() {
        return Err(AppError::BadRequest("filename cannot be empty".into()));
    }
    if name.contains('\0') {
        return Err(AppError::BadRequest("filename contains a null byte".into()));
    }
    if name == "." || name == ".." {
        return Err(AppError::BadRequest("filename is not a valid name".into()));
    }
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_traversal() {
        assert!(safe_filename("").is_err());
        assert!(safe_filename(".").is_err());
        assert!(safe_filename("..").is_err());
    }

    #[test]
    fn strips_separators() {
        assert_eq!(safe_filename("a/b\\c").unwrap(), "a_b_c");
    }

    #[test]
    fn passes_through_ordinary_names() {
        assert_eq!(safe_filename("report.pdf").unwrap(), "report.pdf");
    }
}
