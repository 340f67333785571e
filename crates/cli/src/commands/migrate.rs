//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! dl-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `DISPATCH_DATABASE_URL` - `PostgreSQL` connection string for the
//!   dispatcher (falls back to `DATABASE_URL`)
//!
//! Migration files live in `crates/dispatch/migrations/`.

use sqlx::PgPool;

/// Errors that can occur while running migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run dispatcher database migrations.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the connection fails, or
/// a migration fails to apply.
pub async fn dispatch() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DISPATCH_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| MigrationError::MissingEnvVar("DISPATCH_DATABASE_URL"))?;

    tracing::info!("Connecting to dispatcher database...");
    let pool = PgPool::connect(&database_url).await?;

    tracing::info!("Running dispatcher migrations...");
    sqlx::migrate!("../dispatch/migrations").run(&pool).await?;

    tracing::info!("Dispatcher migrations complete!");
    Ok(())
}
