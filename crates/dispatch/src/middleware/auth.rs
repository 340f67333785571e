//! Scheduler authentication extractor.
//!
//! The dispatch endpoint is invoked by a cron scheduler that presents a
//! shared secret as a bearer token. The extractor rejects the request before
//! the handler body runs, so a failed check can never reach the database or
//! the email provider.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use secrecy::ExposeSecret;

use crate::error::AppError;
use crate::state::AppState;

/// Extractor that requires the scheduler's bearer token.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(_auth: RequireCronAuth, State(state): State<AppState>) -> impl IntoResponse {
///     // only reached with a valid `authorization: Bearer <CRON_SECRET>`
/// }
/// ```
pub struct RequireCronAuth;

impl FromRequestParts<AppState> for RequireCronAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match token {
            Some(token) if token == state.config().cron_secret.expose_secret() => Ok(Self),
            Some(_) => Err(AppError::Unauthorized("invalid bearer token".to_string())),
            None => Err(AppError::Unauthorized(
                "missing bearer token".to_string(),
            )),
        }
    }
}
