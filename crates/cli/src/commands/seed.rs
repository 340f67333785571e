//! Seed the database with development data.
//!
//! Inserts a small set of purchasers, payments, and tickets covering the
//! states the dispatcher distinguishes:
//!
//! - a purchaser with an email and a validated payment (will be emailed)
//! - a purchaser without an email and a validated payment (reported as
//!   "missing email")
//! - a purchaser whose payment is not validated yet (ignored)
//! - an already-notified ticket (ignored)

use sqlx::{PgPool, Row};
use tracing::info;

/// Errors that can occur while seeding.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Seed ticketing development data.
///
/// # Errors
///
/// Returns an error if the database URL is missing or an insert fails.
pub async fn ticketing() -> Result<(), SeedError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DISPATCH_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| SeedError::MissingEnvVar("DISPATCH_DATABASE_URL"))?;

    let pool = PgPool::connect(&database_url).await?;

    // Purchaser with email, validated payment, two tickets -> gets one email
    let ana = insert_user(&pool, "ana", Some("ana@example.com"), "11223344").await?;
    let payment = insert_payment(&pool, ana, true).await?;
    insert_ticket(&pool, payment, "7", false).await?;
    insert_ticket(&pool, payment, "42", false).await?;

    // Purchaser without email, validated payment -> reported as missing email
    let ben = insert_user(&pool, "ben", None, "55667788").await?;
    let payment = insert_payment(&pool, ben, true).await?;
    insert_ticket(&pool, payment, "3", false).await?;

    // Payment not validated yet -> not eligible
    let cho = insert_user(&pool, "cho", Some("cho@example.com"), "99001122").await?;
    let payment = insert_payment(&pool, cho, false).await?;
    insert_ticket(&pool, payment, "88", false).await?;

    // Already notified -> not eligible
    let payment = insert_payment(&pool, ana, true).await?;
    insert_ticket(&pool, payment, "100", true).await?;

    info!("Seeded 3 purchasers, 4 payments, 5 tickets");
    Ok(())
}

async fn insert_user(
    pool: &PgPool,
    name: &str,
    email: Option<&str>,
    identity_card: &str,
) -> Result<i32, SeedError> {
    let row = sqlx::query("INSERT INTO users (name, email, identity_card) VALUES ($1, $2, $3) RETURNING id")
        .bind(name)
        .bind(email)
        .bind(identity_card)
        .fetch_one(pool)
        .await?;

    Ok(row.get(0))
}

async fn insert_payment(pool: &PgPool, user_id: i32, validated: bool) -> Result<i32, SeedError> {
    let row = sqlx::query("INSERT INTO payments (user_id, validated) VALUES ($1, $2) RETURNING id")
        .bind(user_id)
        .bind(validated)
        .fetch_one(pool)
        .await?;

    Ok(row.get(0))
}

async fn insert_ticket(
    pool: &PgPool,
    payment_id: i32,
    code: &str,
    notified: bool,
) -> Result<i32, SeedError> {
    let row =
        sqlx::query("INSERT INTO tickets (payment_id, code, notified) VALUES ($1, $2, $3) RETURNING id")
            .bind(payment_id)
            .bind(code)
            .bind(notified)
            .fetch_one(pool)
            .await?;

    Ok(row.get(0))
}
