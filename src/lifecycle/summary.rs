use diesel::prelude::*;
use diesel::PgConnection;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::task;
use tracing::{info, warn};
use uuid::Uuid;

use super::{EventType, TicketStatus};
use crate::effects::TicketDigest;
use crate::models::Ticket;
use crate::schema::{ticket_comments, ticket_events, tickets};
use crate::state::AppState;
use crate::utils::time::{to_iso, to_iso_opt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Generated(String),
    AlreadySummarized(String),
}

impl SummaryOutcome {
    pub fn summary(&self) -> &str {
        match self {
            SummaryOutcome::Generated(text) | SummaryOutcome::AlreadySummarized(text) => text,
        }
    }

    pub fn generated(&self) -> bool {
        matches!(self, SummaryOutcome::Generated(_))
    }
}

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("ticket not found")]
    NotFound,
    #[error("only closed tickets can be summarized")]
    NotClosed,
    #[error("summary generation failed: {0:#}")]
    Generator(anyhow::Error),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SummaryFailure {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BatchSummaryReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<SummaryFailure>,
}

impl BatchSummaryReport {
    fn record(&mut self, ticket_id: Uuid, ticket_number: String, result: Result<SummaryOutcome, SummaryError>) {
        match result {
            Ok(SummaryOutcome::Generated(_)) => self.successful += 1,
            // Summarized by someone else between listing and writing.
            Ok(SummaryOutcome::AlreadySummarized(_)) => self.skipped += 1,
            Err(err) => {
                self.failed += 1;
                self.errors.push(SummaryFailure {
                    ticket_id,
                    ticket_number,
                    error: err.to_string(),
                });
            }
        }
    }
}

enum Prepared {
    Done(String),
    Pending(TicketDigest),
}

/// Generates and stores the summary of one closed ticket. The summary is
/// write-once: an existing summary is returned untouched.
pub async fn summarize_ticket(
    state: &AppState,
    ticket_id: Uuid,
) -> Result<SummaryOutcome, SummaryError> {
    let prepared = blocking(state, move |conn| prepare(conn, ticket_id)).await?;
    let digest = match prepared {
        Prepared::Done(existing) => return Ok(SummaryOutcome::AlreadySummarized(existing)),
        Prepared::Pending(digest) => digest,
    };

    let summary = state
        .summarizer
        .summarize(&digest)
        .await
        .map_err(SummaryError::Generator)?;

    let outcome = blocking(state, move |conn| store(conn, ticket_id, summary)).await?;
    if outcome.generated() {
        info!(ticket_id = %ticket_id, ticket_number = %digest.ticket_number, "closed ticket summarized");
    }
    Ok(outcome)
}

/// Summarizes every closed ticket that has no summary yet. Failures are
/// isolated per ticket and reported; the run can be repeated safely.
pub async fn generate_all_summaries(state: &AppState) -> Result<BatchSummaryReport, SummaryError> {
    let closed: Vec<(Uuid, String, Option<String>)> = blocking(state, |conn| {
        tickets::table
            .filter(tickets::status.eq(TicketStatus::Closed.as_str()))
            .order(tickets::closed_at.asc())
            .select((tickets::id, tickets::ticket_number, tickets::closed_summary))
            .load(conn)
            .map_err(SummaryError::from)
    })
    .await?;

    let mut report = BatchSummaryReport {
        total: closed.len(),
        ..Default::default()
    };

    let pending: Vec<(Uuid, String)> = closed
        .into_iter()
        .filter_map(|(id, number, summary)| match summary {
            Some(_) => {
                report.skipped += 1;
                None
            }
            None => Some((id, number)),
        })
        .collect();

    // Each ticket appears once, so no two writes target the same row.
    let concurrency = state.config.summary_concurrency.max(1);
    let results: Vec<_> = stream::iter(pending)
        .map(|(id, number)| async move {
            let result = summarize_ticket(state, id).await;
            (id, number, result)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    for (id, number, result) in results {
        if let Err(err) = &result {
            warn!(ticket_id = %id, ticket_number = %number, error = %err, "summary generation failed");
        }
        report.record(id, number, result);
    }

    info!(
        total = report.total,
        successful = report.successful,
        failed = report.failed,
        skipped = report.skipped,
        "batch summary run finished"
    );
    Ok(report)
}

async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, SummaryError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, SummaryError> + Send + 'static,
{
    let state = state.clone();
    task::spawn_blocking(move || {
        let mut conn = state
            .db()
            .map_err(|err| SummaryError::Unavailable(err.message().to_string()))?;
        f(&mut conn)
    })
    .await
    .map_err(|err| SummaryError::Unavailable(format!("summary task failed: {err}")))?
}

fn prepare(conn: &mut PgConnection, ticket_id: Uuid) -> Result<Prepared, SummaryError> {
    let ticket: Ticket = tickets::table
        .find(ticket_id)
        .first(conn)
        .optional()?
        .ok_or(SummaryError::NotFound)?;

    if ticket.status != TicketStatus::Closed.as_str() {
        return Err(SummaryError::NotClosed);
    }
    if let Some(existing) = ticket.closed_summary {
        return Ok(Prepared::Done(existing));
    }

    let transitions: Vec<Option<String>> = ticket_events::table
        .filter(ticket_events::ticket_id.eq(ticket_id))
        .filter(ticket_events::event_type.eq(EventType::StatusChanged.as_str()))
        .order(ticket_events::created_at.asc())
        .select(ticket_events::new_value)
        .load(conn)?;

    let public_comments: Vec<String> = ticket_comments::table
        .filter(ticket_comments::ticket_id.eq(ticket_id))
        .filter(ticket_comments::is_internal.eq(false))
        .order(ticket_comments::created_at.asc())
        .select(ticket_comments::body)
        .load(conn)?;

    let mut status_history = vec![TicketStatus::Open.as_str().to_string()];
    status_history.extend(transitions.into_iter().flatten());

    Ok(Prepared::Pending(TicketDigest {
        ticket_id: ticket.id,
        ticket_number: ticket.ticket_number,
        title: ticket.title,
        description: ticket.description,
        priority: ticket.priority,
        created_at: to_iso(ticket.created_at),
        resolved_at: to_iso_opt(ticket.resolved_at),
        closed_at: to_iso_opt(ticket.closed_at),
        status_history,
        public_comments,
    }))
}

fn store(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    summary: String,
) -> Result<SummaryOutcome, SummaryError> {
    let updated = diesel::update(
        tickets::table
            .filter(tickets::id.eq(ticket_id))
            .filter(tickets::status.eq(TicketStatus::Closed.as_str()))
            .filter(tickets::closed_summary.is_null()),
    )
    .set(tickets::closed_summary.eq(Some(&summary)))
    .execute(conn)?;

    if updated == 1 {
        return Ok(SummaryOutcome::Generated(summary));
    }

    let stored: Option<Option<String>> = tickets::table
        .find(ticket_id)
        .select(tickets::closed_summary)
        .first(conn)
        .optional()?;
    match stored {
        None => Err(SummaryError::NotFound),
        Some(Some(existing)) => Ok(SummaryOutcome::AlreadySummarized(existing)),
        Some(None) => Err(SummaryError::NotClosed),
    }
}
