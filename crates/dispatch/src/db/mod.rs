//! Database operations for the dispatcher `PostgreSQL`.
//!
//! # Tables
//!
//! - `users` - Purchasers (name, optional email, identity card number)
//! - `payments` - Purchases; `validated` is flipped by the upstream payment flow
//! - `tickets` - One row per ticket; `notified` is the only column this
//!   service writes
//!
//! All three tables are populated upstream by the purchase flow. This service
//! reads them joined and performs the single monotonic transition
//! `tickets.notified: false -> true`.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/dispatch/migrations/` and run via:
//! ```bash
//! cargo run -p doorlist-cli -- migrate
//! ```

pub mod tickets;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use tickets::TicketRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
