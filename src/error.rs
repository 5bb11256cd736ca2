//! Error taxonomy for the EBR service.
//!
//! Every failure a handler can surface maps onto one variant, and every
//! variant maps onto one HTTP status plus the JSON envelope
//! `{success: false, error, code}`. Internal detail (SQL, IO) is logged
//! but never leaked to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input, e.g. a cross-tenant recipe reference.
    #[error("{0}")]
    Validation(String),

    /// Missing, invalid, or expired session.
    #[error("{0}")]
    Auth(String),

    /// Authenticated but the role does not cover the operation.
    #[error("Insufficient permissions")]
    Permission,

    /// Entity absent, wrong tenant, or wrong lifecycle state for the
    /// requested transition. Deliberately conflated so cross-tenant
    /// existence never leaks.
    #[error("{0}")]
    NotFound(String),

    /// Unique-constraint violation, e.g. duplicate email.
    #[error("{0}")]
    Conflict(String),

    /// Operation requested against an incompatible lifecycle state,
    /// e.g. a report on a batch that is not completed.
    #[error("{0}")]
    InvalidState(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Permission => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Permission => "PERMISSION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Opaque message for 500s; the real cause goes to the log.
            AppError::Database(e) => {
                tracing::error!("database error: {e}");
                "Internal Server Error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:?}");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({
            "success": false,
            "error": message,
            "code": self.code(),
        }));
        (status, body).into_response()
    }
}

/// Maps a sqlx error to `Conflict` when it is a unique-constraint
/// violation, preserving the original error otherwise.
pub fn conflict_on_unique(err: sqlx::Error, message: &str) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation {
            return AppError::Conflict(message.to_string());
        }
    }
    AppError::Database(err)
}
