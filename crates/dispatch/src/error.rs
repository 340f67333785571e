//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! The only consumer of this service is a scheduler, so error responses are
//! JSON (`{"message", "error"}`) rather than rendered pages.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;

/// Application-level error type for the dispatcher.
///
/// Per-purchaser send and update failures never become an `AppError`; they
/// are collected into the dispatch report. Only the initial fetch (and the
/// bearer check) can fail a whole request.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(self, Self::Database(_)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let (status, body) = match &self {
            Self::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "message": "Failed to fetch pending tickets",
                    "error": e.to_string(),
                }),
            ),
            // Don't expose which check failed to the caller
            Self::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": "Unauthorized" }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
