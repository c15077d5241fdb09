//! Ticket lifecycle: status machine, audit ledger and the operations that move a
//! ticket from creation to closure.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::AccessDenied;
use crate::gating::GatingError;

pub mod engine;
pub mod events;
pub mod summary;

pub use engine::{
    acknowledge_ticket, add_comment, assign_ticket, change_status, create_ticket,
    delete_ticket, edit_ticket, get_ticket, list_comments, list_tickets, rate_ticket,
    NewTicketInput, TicketEdit, TicketFilter, Transition,
};
pub use events::{append_event, list_events, EventRecord};
pub use summary::{
    generate_all_summaries, summarize_ticket, BatchSummaryReport, SummaryError,
    SummaryFailure, SummaryOutcome,
};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Forbidden(#[from] AccessDenied),
    #[error("ticket not found")]
    NotFound,
    #[error("{0}")]
    InvalidState(String),
    #[error("ticket has already been acknowledged")]
    AlreadyAcknowledged,
    #[error("ticket has already been rated")]
    AlreadyRated,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Gating(#[from] GatingError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Closed | TicketStatus::Cancelled)
    }

    /// Checks whether a ticket may move from `self` to `next`.
    ///
    /// Any non-terminal status may move to any other status, except that
    /// cancellation is only possible before the ticket has been resolved.
    pub fn check_transition(self, next: TicketStatus) -> LifecycleResult<()> {
        if self.is_terminal() {
            return Err(LifecycleError::InvalidState(format!(
                "ticket is {self} and can no longer change"
            )));
        }
        if self == next {
            return Err(LifecycleError::InvalidState(format!(
                "ticket is already {next}"
            )));
        }
        if next == TicketStatus::Cancelled
            && !matches!(self, TicketStatus::Open | TicketStatus::InProgress)
        {
            return Err(LifecycleError::InvalidState(
                "only open or in-progress tickets can be cancelled".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(LifecycleError::Validation(format!(
                "unknown ticket status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(LifecycleError::Validation(format!(
                "unknown priority '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    StatusChanged,
    Assigned,
    CommentAdded,
    AttachmentAdded,
    PriorityChanged,
    Updated,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::StatusChanged => "status_changed",
            EventType::Assigned => "assigned",
            EventType::CommentAdded => "comment_added",
            EventType::AttachmentAdded => "attachment_added",
            EventType::PriorityChanged => "priority_changed",
            EventType::Updated => "updated",
        }
    }
}

/// Current time truncated to the storage precision of `timestamptz`.
pub(crate) fn now_micros() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}

/// Stored statuses are constrained by the schema; an unknown value means the row
/// was written outside this service.
pub(crate) fn stored_status(value: &str) -> LifecycleResult<TicketStatus> {
    value
        .parse()
        .map_err(|_| LifecycleError::InvalidState(format!("ticket has unknown status '{value}'")))
}
