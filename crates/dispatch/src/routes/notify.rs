//! Ticket notification dispatch route handler.

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::instrument;

use crate::db::TicketRepository;
use crate::dispatch::{self, DispatchOutcome, DispatchReport};
use crate::error::AppError;
use crate::middleware::RequireCronAuth;
use crate::state::AppState;

/// Response body for a dispatch invocation.
///
/// `results` is omitted entirely on a no-op run, so the scheduler can tell
/// "nothing pending" apart from "everything failed".
#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<DispatchReport>,
}

/// Dispatch pending ticket notifications.
///
/// Fetches eligible tickets, emails each purchaser their codes, marks the
/// emailed tickets notified, and reports per-purchaser outcomes. A fetch
/// failure is the only terminal error; everything else lands in `failed`.
#[instrument(skip_all)]
pub async fn dispatch(
    _auth: RequireCronAuth,
    State(state): State<AppState>,
) -> Result<Json<DispatchResponse>, AppError> {
    let repository = TicketRepository::new(state.pool());

    let outcome = dispatch::run(&repository, state.mailer()).await?;

    let response = match outcome {
        DispatchOutcome::NothingPending => DispatchResponse {
            message: "No tickets pending notification".to_string(),
            results: None,
        },
        DispatchOutcome::Completed(report) => DispatchResponse {
            message: format!(
                "Ticket notifications dispatched: {} sent, {} failed",
                report.success.len(),
                report.failed.len()
            ),
            results: Some(report),
        },
    };

    Ok(Json(response))
}
