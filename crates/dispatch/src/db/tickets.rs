//! Ticket repository for database operations.
//!
//! Runtime-checked queries (`sqlx::query_as`) rather than the compile-time
//! macros: the dispatcher builds without a live database or offline query
//! cache, and the two queries here are small enough to review by hand.

use async_trait::async_trait;
use sqlx::PgPool;

use doorlist_core::{Email, TicketId, UserId};

use super::RepositoryError;
use crate::dispatch::{EligibleTicket, TicketStore};

/// Join of tickets -> payments -> users, filtered to eligible tickets only:
/// the payment is validated and the ticket has not been notified.
const ELIGIBLE_QUERY: &str = r"
    SELECT t.id AS ticket_id,
           t.code,
           u.id AS user_id,
           u.name AS user_name,
           u.identity_card,
           u.email
    FROM tickets t
    JOIN payments p ON p.id = t.payment_id
    JOIN users u ON u.id = p.user_id
    WHERE t.notified = false
      AND p.validated = true
    ORDER BY u.id, t.id
";

const MARK_NOTIFIED_QUERY: &str = "UPDATE tickets SET notified = true WHERE id = ANY($1)";

/// Row shape returned by [`ELIGIBLE_QUERY`].
#[derive(Debug, sqlx::FromRow)]
struct EligibleTicketRow {
    ticket_id: TicketId,
    code: String,
    user_id: UserId,
    user_name: String,
    identity_card: String,
    email: Option<String>,
}

impl From<EligibleTicketRow> for EligibleTicket {
    fn from(row: EligibleTicketRow) -> Self {
        // A malformed stored address is "no usable email": the group is
        // reported as missing email instead of failing the whole fetch.
        let email = match Email::parse_optional(row.email.as_deref()) {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!(
                    user_id = %row.user_id,
                    error = %e,
                    "stored email address is invalid, treating as missing"
                );
                None
            }
        };

        Self {
            ticket_id: row.ticket_id,
            code: row.code,
            user_id: row.user_id,
            user_name: row.user_name,
            identity_card: row.identity_card,
            email,
        }
    }
}

/// Repository for ticket database operations.
pub struct TicketRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> TicketRepository<'a> {
    /// Create a new ticket repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketStore for TicketRepository<'_> {
    async fn fetch_eligible(&self) -> Result<Vec<EligibleTicket>, RepositoryError> {
        let rows = sqlx::query_as::<_, EligibleTicketRow>(ELIGIBLE_QUERY)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(EligibleTicket::from).collect())
    }

    async fn mark_notified(&self, tickets: &[TicketId]) -> Result<(), RepositoryError> {
        let ids: Vec<i32> = tickets.iter().map(TicketId::as_i32).collect();

        let result = sqlx::query(MARK_NOTIFIED_QUERY)
            .bind(&ids)
            .execute(self.pool)
            .await?;

        if result.rows_affected() != ids.len() as u64 {
            tracing::warn!(
                requested = ids.len(),
                updated = result.rows_affected(),
                "mark_notified updated fewer rows than requested"
            );
        }

        Ok(())
    }
}
