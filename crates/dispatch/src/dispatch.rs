//! Batch notification dispatcher.
//!
//! The core of the service: fetch every ticket whose payment is validated
//! but which has not been notified yet, group the tickets by purchaser, send
//! one email per purchaser, and mark the emailed tickets as notified.
//!
//! Per-purchaser operations run concurrently and independently. The join is
//! settle-all: every group produces exactly one outcome (success or failure)
//! and one group's failure never aborts or rolls back a sibling. Failed
//! groups stay eligible and are picked up by the next scheduled run.
//!
//! Known limitation: when the email is sent but the ticket update fails, the
//! tickets remain eligible and the next run sends the same email again.
//! There is no idempotency key on the provider call; the failure is reported
//! with its own message so operators can spot it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use doorlist_core::{Email, TicketId, UserId};

use crate::db::RepositoryError;

/// Width ticket codes are zero-padded to in the email body.
const TICKET_CODE_WIDTH: usize = 4;

/// A ticket eligible for notification, with its purchaser resolved.
///
/// Eligibility is decided at fetch time: the owning payment is validated and
/// the ticket has not been notified.
#[derive(Debug, Clone)]
pub struct EligibleTicket {
    pub ticket_id: TicketId,
    pub code: String,
    pub user_id: UserId,
    pub user_name: String,
    pub identity_card: String,
    pub email: Option<Email>,
}

/// One ticket inside a [`NotificationGroup`].
#[derive(Debug, Clone)]
pub struct GroupTicket {
    pub id: TicketId,
    pub code: String,
}

/// All eligible tickets belonging to one purchaser, sent as a single email.
#[derive(Debug, Clone)]
pub struct NotificationGroup {
    pub user_id: UserId,
    pub user_name: String,
    pub identity_card: String,
    pub email: Option<Email>,
    pub tickets: Vec<GroupTicket>,
}

/// Successful dispatch for one purchaser.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSuccess {
    #[serde(rename = "id_user")]
    pub user_id: UserId,
    /// Provider-assigned identifier for the sent message.
    #[serde(rename = "email_id")]
    pub email_id: String,
}

/// Failed dispatch for one purchaser.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchFailure {
    #[serde(rename = "id_user")]
    pub user_id: UserId,
    pub error: String,
}

/// Partitioned outcome of a dispatch run.
#[derive(Debug, Default, Serialize)]
pub struct DispatchReport {
    pub success: Vec<DispatchSuccess>,
    pub failed: Vec<DispatchFailure>,
}

/// Result of a dispatch run.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// No eligible tickets were found; nothing was sent.
    NothingPending,
    /// At least one group was processed.
    Completed(DispatchReport),
}

/// Data source for eligible tickets and the notified-flag update.
///
/// Implemented by the sqlx repository in production and by fakes in tests.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Fetch all eligible tickets with their purchaser resolved.
    async fn fetch_eligible(&self) -> Result<Vec<EligibleTicket>, RepositoryError>;

    /// Mark the given tickets as notified.
    async fn mark_notified(&self, tickets: &[TicketId]) -> Result<(), RepositoryError>;
}

/// A fully rendered outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: Email,
    pub subject: String,
    pub html: String,
}

/// Provider acknowledgement for a sent email.
#[derive(Debug, Clone)]
pub struct SentEmail {
    /// Provider-assigned message identifier, used to trace delivery.
    pub message_id: String,
}

/// Error from the email provider, carried as its display text.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MailerError(pub String);

/// Outbound email capability.
///
/// Injected into [`run`] rather than reached through a shared global client,
/// so tests can substitute a fake.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send the email and return the provider acknowledgement.
    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, MailerError>;
}

/// Run one dispatch cycle: fetch, group, fan out, settle, partition.
///
/// # Errors
///
/// Returns an error only when the initial fetch fails. Every later failure
/// is per-group and lands in the report's `failed` list.
pub async fn run<S, M>(store: &S, mailer: &M) -> Result<DispatchOutcome, RepositoryError>
where
    S: TicketStore,
    M: Mailer,
{
    let eligible = store.fetch_eligible().await?;

    if eligible.is_empty() {
        tracing::info!("no tickets pending notification");
        return Ok(DispatchOutcome::NothingPending);
    }

    let groups = group_by_user(eligible);
    tracing::info!(groups = groups.len(), "dispatching ticket notifications");

    let outcomes = join_all(
        groups
            .iter()
            .map(|group| dispatch_group(store, mailer, group)),
    )
    .await;

    let mut report = DispatchReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(success) => report.success.push(success),
            Err(failure) => report.failed.push(failure),
        }
    }

    tracing::info!(
        success = report.success.len(),
        failed = report.failed.len(),
        "dispatch cycle complete"
    );

    Ok(DispatchOutcome::Completed(report))
}

/// Group eligible tickets by purchaser.
///
/// Pure function of the fetched set; groups come back ordered by user id so
/// runs are deterministic.
#[must_use]
pub fn group_by_user(tickets: Vec<EligibleTicket>) -> Vec<NotificationGroup> {
    let mut groups: BTreeMap<UserId, NotificationGroup> = BTreeMap::new();

    for ticket in tickets {
        groups
            .entry(ticket.user_id)
            .or_insert_with(|| NotificationGroup {
                user_id: ticket.user_id,
                user_name: ticket.user_name.clone(),
                identity_card: ticket.identity_card.clone(),
                email: ticket.email.clone(),
                tickets: Vec::new(),
            })
            .tickets
            .push(GroupTicket {
                id: ticket.ticket_id,
                code: ticket.code,
            });
    }

    groups.into_values().collect()
}

/// Process one purchaser's group: render, send, mark notified.
///
/// The update only runs after a confirmed send; a failed update is reported
/// with its own message since the email already went out.
async fn dispatch_group<S, M>(
    store: &S,
    mailer: &M,
    group: &NotificationGroup,
) -> Result<DispatchSuccess, DispatchFailure>
where
    S: TicketStore,
    M: Mailer,
{
    let Some(to) = &group.email else {
        tracing::warn!(user_id = %group.user_id, "purchaser has no usable email address");
        return Err(DispatchFailure {
            user_id: group.user_id,
            error: "missing email".to_owned(),
        });
    };

    let email = render_email(group, to);

    let sent = mailer.send(&email).await.map_err(|e| {
        tracing::warn!(user_id = %group.user_id, error = %e, "ticket email send failed");
        DispatchFailure {
            user_id: group.user_id,
            error: e.to_string(),
        }
    })?;

    let ticket_ids: Vec<TicketId> = group.tickets.iter().map(|t| t.id).collect();

    if let Err(e) = store.mark_notified(&ticket_ids).await {
        tracing::error!(
            user_id = %group.user_id,
            email_id = %sent.message_id,
            error = %e,
            "notification sent but state update failed"
        );
        return Err(DispatchFailure {
            user_id: group.user_id,
            error: format!("notification sent but state update failed: {e}"),
        });
    }

    tracing::info!(
        user_id = %group.user_id,
        email_id = %sent.message_id,
        tickets = ticket_ids.len(),
        "ticket notification delivered"
    );

    Ok(DispatchSuccess {
        user_id: group.user_id,
        email_id: sent.message_id,
    })
}

/// Render the notification email for one group.
fn render_email(group: &NotificationGroup, to: &Email) -> OutboundEmail {
    let name = capitalize_first(&group.user_name);
    let codes = group
        .tickets
        .iter()
        .map(|t| pad_code(&t.code))
        .collect::<Vec<_>>()
        .join(", ");

    let subject = format!("Your Doorlist tickets: {codes}");

    let plural = if group.tickets.len() == 1 {
        "ticket is"
    } else {
        "tickets are"
    };

    let html = format!(
        "<p>Hi {name},</p>\
         <p>Your {plural} confirmed. Ticket code(s): <strong>{codes}</strong></p>\
         <p>Entry is validated against the ID number on the purchase: {id_card}. \
         Please bring that document to the door.</p>\
         <p>See you there!<br>The Doorlist team</p>",
        id_card = group.identity_card,
    );

    OutboundEmail {
        to: to.clone(),
        subject,
        html,
    }
}

/// Zero-pad a ticket code to the fixed display width.
fn pad_code(code: &str) -> String {
    format!("{code:0>TICKET_CODE_WIDTH$}")
}

/// Uppercase the first character of a name.
fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ticket(
        ticket_id: i32,
        code: &str,
        user_id: i32,
        name: &str,
        email: Option<&str>,
    ) -> EligibleTicket {
        EligibleTicket {
            ticket_id: TicketId::new(ticket_id),
            code: code.to_owned(),
            user_id: UserId::new(user_id),
            user_name: name.to_owned(),
            identity_card: format!("ID-{user_id:03}"),
            email: email.map(|e| Email::parse(e).unwrap()),
        }
    }

    /// In-memory store; `failing_updates` lists ticket ids whose update errors.
    #[derive(Default)]
    struct FakeStore {
        tickets: Vec<EligibleTicket>,
        fail_fetch: bool,
        failing_updates: Vec<TicketId>,
        marked: Mutex<Vec<TicketId>>,
    }

    #[async_trait]
    impl TicketStore for FakeStore {
        async fn fetch_eligible(&self) -> Result<Vec<EligibleTicket>, RepositoryError> {
            if self.fail_fetch {
                return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(self.tickets.clone())
        }

        async fn mark_notified(&self, tickets: &[TicketId]) -> Result<(), RepositoryError> {
            if tickets.iter().any(|t| self.failing_updates.contains(t)) {
                return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
            }
            self.marked.lock().unwrap().extend_from_slice(tickets);
            Ok(())
        }
    }

    /// Records every send; fails for recipients listed in `failing_recipients`.
    #[derive(Default)]
    struct FakeMailer {
        failing_recipients: Vec<String>,
        sent: Mutex<Vec<OutboundEmail>>,
        counter: AtomicUsize,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, MailerError> {
            if self.failing_recipients.contains(&email.to.as_str().to_owned()) {
                return Err(MailerError("provider rejected the message".to_owned()));
            }
            self.sent.lock().unwrap().push(email.clone());
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SentEmail {
                message_id: format!("msg-{n}"),
            })
        }
    }

    fn report(outcome: DispatchOutcome) -> DispatchReport {
        match outcome {
            DispatchOutcome::Completed(report) => report,
            DispatchOutcome::NothingPending => panic!("expected a completed run"),
        }
    }

    #[test]
    fn test_group_by_user_merges_same_user() {
        let groups = group_by_user(vec![
            ticket(1, "7", 1, "ana", Some("ana@example.com")),
            ticket(2, "42", 1, "ana", Some("ana@example.com")),
            ticket(3, "3", 2, "ben", None),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].user_id, UserId::new(1));
        assert_eq!(groups[0].tickets.len(), 2);
        assert_eq!(groups[1].user_id, UserId::new(2));
        assert_eq!(groups[1].tickets.len(), 1);
    }

    #[test]
    fn test_group_by_user_is_deterministic() {
        let a = group_by_user(vec![
            ticket(1, "1", 3, "c", None),
            ticket(2, "2", 1, "a", None),
            ticket(3, "3", 2, "b", None),
        ]);
        let ids: Vec<UserId> = a.iter().map(|g| g.user_id).collect();
        assert_eq!(ids, vec![UserId::new(1), UserId::new(2), UserId::new(3)]);
    }

    #[test]
    fn test_pad_code() {
        assert_eq!(pad_code("7"), "0007");
        assert_eq!(pad_code("42"), "0042");
        assert_eq!(pad_code("1234"), "1234");
        assert_eq!(pad_code("12345"), "12345");
    }

    #[test]
    fn test_capitalize_first() {
        assert_eq!(capitalize_first("ana"), "Ana");
        assert_eq!(capitalize_first("Ana"), "Ana");
        assert_eq!(capitalize_first(""), "");
        assert_eq!(capitalize_first("ángela"), "Ángela");
    }

    #[tokio::test]
    async fn test_empty_set_is_nothing_pending() {
        let store = FakeStore::default();
        let mailer = FakeMailer::default();

        let outcome = run(&store, &mailer).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::NothingPending));
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_terminal() {
        let store = FakeStore {
            fail_fetch: true,
            ..FakeStore::default()
        };
        let mailer = FakeMailer::default();

        assert!(run(&store, &mailer).await.is_err());
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_email_never_reaches_provider() {
        let store = FakeStore {
            tickets: vec![ticket(1, "9", 5, "ben", None)],
            ..FakeStore::default()
        };
        let mailer = FakeMailer::default();

        let report = report(run(&store, &mailer).await.unwrap());

        assert!(report.success.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].user_id, UserId::new(5));
        assert_eq!(report.failed[0].error, "missing email");
        assert!(mailer.sent.lock().unwrap().is_empty());
        assert!(store.marked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_carries_provider_message_id() {
        let store = FakeStore {
            tickets: vec![ticket(1, "7", 1, "ana", Some("ana@example.com"))],
            ..FakeStore::default()
        };
        let mailer = FakeMailer::default();

        let report = report(run(&store, &mailer).await.unwrap());

        assert_eq!(report.success.len(), 1);
        assert_eq!(report.success[0].email_id, "msg-1");
        assert_eq!(*store.marked.lock().unwrap(), vec![TicketId::new(1)]);
    }

    #[tokio::test]
    async fn test_send_failure_skips_update() {
        let store = FakeStore {
            tickets: vec![ticket(1, "7", 1, "ana", Some("ana@example.com"))],
            ..FakeStore::default()
        };
        let mailer = FakeMailer {
            failing_recipients: vec!["ana@example.com".to_owned()],
            ..FakeMailer::default()
        };

        let report = report(run(&store, &mailer).await.unwrap());

        assert!(report.success.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].error, "provider rejected the message");
        assert!(store.marked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_failure_is_distinguishable_from_send_failure() {
        let store = FakeStore {
            tickets: vec![ticket(1, "7", 1, "ana", Some("ana@example.com"))],
            failing_updates: vec![TicketId::new(1)],
            ..FakeStore::default()
        };
        let mailer = FakeMailer::default();

        let report = report(run(&store, &mailer).await.unwrap());

        assert!(report.success.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(
            report.failed[0]
                .error
                .starts_with("notification sent but state update failed")
        );
        // The email went out before the update failed
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_siblings() {
        let store = FakeStore {
            tickets: vec![
                ticket(1, "7", 1, "ana", Some("ana@example.com")),
                ticket(2, "8", 2, "ben", Some("ben@example.com")),
            ],
            ..FakeStore::default()
        };
        let mailer = FakeMailer {
            failing_recipients: vec!["ana@example.com".to_owned()],
            ..FakeMailer::default()
        };

        let report = report(run(&store, &mailer).await.unwrap());

        assert_eq!(report.success.len(), 1);
        assert_eq!(report.success[0].user_id, UserId::new(2));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].user_id, UserId::new(1));
        assert_eq!(*store.marked.lock().unwrap(), vec![TicketId::new(2)]);
    }

    #[tokio::test]
    async fn test_every_group_settles_exactly_once() {
        let store = FakeStore {
            tickets: vec![
                ticket(1, "1", 1, "ana", Some("ana@example.com")),
                ticket(2, "2", 2, "ben", None),
                ticket(3, "3", 3, "cho", Some("cho@example.com")),
                ticket(4, "4", 3, "cho", Some("cho@example.com")),
            ],
            ..FakeStore::default()
        };
        let mailer = FakeMailer::default();

        let report = report(run(&store, &mailer).await.unwrap());

        let mut seen: Vec<UserId> = report
            .success
            .iter()
            .map(|s| s.user_id)
            .chain(report.failed.iter().map(|f| f.user_id))
            .collect();
        seen.sort();
        assert_eq!(seen, vec![UserId::new(1), UserId::new(2), UserId::new(3)]);
    }

    #[tokio::test]
    async fn test_end_to_end_example() {
        // Two eligible tickets for U1 (email set), one for U2 (no email)
        let store = FakeStore {
            tickets: vec![
                ticket(10, "7", 1, "ana", Some("ana@example.com")),
                ticket(11, "42", 1, "ana", Some("ana@example.com")),
                ticket(12, "3", 2, "ben", None),
            ],
            ..FakeStore::default()
        };
        let mailer = FakeMailer::default();

        let report = report(run(&store, &mailer).await.unwrap());

        // One provider call for U1, body lists both padded codes
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to.as_str(), "ana@example.com");
        assert!(sent[0].html.contains("0007, 0042"));
        assert!(sent[0].html.contains("Ana"));

        // One failed entry for U2 with the missing-email reason
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].user_id, UserId::new(2));
        assert_eq!(report.failed[0].error, "missing email");

        // Only U1's tickets were marked notified
        let marked = store.marked.lock().unwrap();
        assert_eq!(*marked, vec![TicketId::new(10), TicketId::new(11)]);
    }

    #[test]
    fn test_report_serializes_with_contract_field_names() {
        let report = DispatchReport {
            success: vec![DispatchSuccess {
                user_id: UserId::new(1),
                email_id: "msg-1".to_owned(),
            }],
            failed: vec![DispatchFailure {
                user_id: UserId::new(2),
                error: "missing email".to_owned(),
            }],
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"][0]["id_user"], 1);
        assert_eq!(json["success"][0]["email_id"], "msg-1");
        assert_eq!(json["failed"][0]["id_user"], 2);
        assert_eq!(json["failed"][0]["error"], "missing email");
    }
}
