//! HTTP route handlers for the dispatcher.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health              - Liveness check (in main)
//! GET  /health/ready        - Readiness check, pings the database (in main)
//!
//! # Dispatch
//! GET  /api/tickets/notify  - Dispatch pending notifications (scheduler alias)
//! POST /api/tickets/notify  - Dispatch pending notifications
//! ```
//!
//! GET and POST share one handler and one bearer check; the GET route exists
//! only because some schedulers can only issue GET requests.

pub mod notify;

use axum::{Router, routing::get};

use crate::state::AppState;

/// Create the dispatcher routes router.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/api/tickets/notify",
        get(notify::dispatch).post(notify::dispatch),
    )
}
