use chrono::{Duration, NaiveDateTime};
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{engine::load_visible, now_micros, EventType, LifecycleResult};
use crate::access::AccessScope;
use crate::models::{NewTicketEvent, TicketEvent};
use crate::schema::ticket_events;
use crate::utils::time::to_iso;

/// Describes an event about to be appended to a ticket's ledger.
pub struct EventRecord<'a> {
    pub event_type: EventType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<&'a str>,
    pub metadata: Value,
}

impl<'a> EventRecord<'a> {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            old_value: None,
            new_value: None,
            comment: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn values(mut self, old_value: Option<String>, new_value: Option<String>) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn comment(mut self, comment: Option<&'a str>) -> Self {
        self.comment = comment;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Appends an event. Callers must hold the ticket row lock so that timestamps
/// stay strictly increasing per ticket.
pub fn append_event(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    actor_id: Uuid,
    record: EventRecord<'_>,
) -> QueryResult<TicketEvent> {
    let last: Option<NaiveDateTime> = ticket_events::table
        .filter(ticket_events::ticket_id.eq(ticket_id))
        .select(max(ticket_events::created_at))
        .first(conn)?;

    let new_event = NewTicketEvent {
        id: Uuid::new_v4(),
        ticket_id,
        actor_id,
        event_type: record.event_type.as_str().to_string(),
        old_value: record.old_value,
        new_value: record.new_value,
        comment: record.comment.map(str::to_string),
        metadata: record.metadata,
        created_at: next_event_time(last, now_micros()),
    };

    diesel::insert_into(ticket_events::table)
        .values(&new_event)
        .get_result(conn)
}

pub fn list_events(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
) -> LifecycleResult<Vec<TicketEvent>> {
    let ticket = load_visible(conn, scope, ticket_id)?;
    let staff = scope.is_org_admin(Some(ticket.organization_id));

    let events: Vec<TicketEvent> = ticket_events::table
        .filter(ticket_events::ticket_id.eq(ticket_id))
        .order(ticket_events::created_at.asc())
        .load(conn)?;

    Ok(events
        .into_iter()
        .filter(|event| staff || !is_internal(event))
        .collect())
}

fn is_internal(event: &TicketEvent) -> bool {
    event
        .metadata
        .get("is_internal")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn next_event_time(last: Option<NaiveDateTime>, now: NaiveDateTime) -> NaiveDateTime {
    match last {
        Some(last) if last >= now => last + Duration::microseconds(1),
        _ => now,
    }
}

#[derive(Serialize)]
pub struct EventResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub actor_id: Uuid,
    pub event_type: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub metadata: Value,
    pub created_at: String,
}

impl From<TicketEvent> for EventResponse {
    fn from(event: TicketEvent) -> Self {
        Self {
            id: event.id,
            ticket_id: event.ticket_id,
            actor_id: event.actor_id,
            event_type: event.event_type,
            old_value: event.old_value,
            new_value: event.new_value,
            comment: event.comment,
            metadata: event.metadata,
            created_at: to_iso(event.created_at),
        }
    }
}
