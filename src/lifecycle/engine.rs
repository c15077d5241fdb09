use chrono::Duration;
use diesel::prelude::*;
use diesel::PgConnection;
use serde_json::{json, Map};
use tracing::info;
use uuid::Uuid;

use super::events::{append_event, EventRecord};
use super::{
    now_micros, stored_status, EventType, LifecycleError, LifecycleResult, Priority,
    TicketStatus,
};
use crate::access::{Access, AccessDenied, AccessScope, AdminTier, TicketVisibility};
use crate::effects::{Notification, NotificationKind, SideEffect};
use crate::gating;
use crate::models::{
    Hardware, Location, NewTicket, NewTicketComment, Principal, Ticket, TicketComment,
};
use crate::schema::{
    hardware, locations, memberships, organizations, principals, ticket_comments, tickets,
};

pub use crate::utils::time::to_iso;

const MAX_TITLE_LENGTH: usize = 255;

/// Result of a successful mutation: the ticket as stored after commit and the side
/// effects to dispatch once the transaction is durable.
#[derive(Debug)]
pub struct Transition {
    pub ticket: Ticket,
    pub effects: Vec<SideEffect>,
}

#[derive(Debug, Clone)]
pub struct NewTicketInput {
    pub organization_id: Option<Uuid>,
    pub location_id: Uuid,
    pub hardware_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Default)]
pub struct TicketEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn create_ticket(
    conn: &mut PgConnection,
    scope: &AccessScope,
    input: NewTicketInput,
    acknowledgment_validity: Duration,
) -> LifecycleResult<Transition> {
    let title = validate_title(&input.title)?;
    let description = validate_description(&input.description)?;

    let ticket = conn.transaction::<Ticket, LifecycleError, _>(|conn| {
        let location: Location = locations::table
            .find(input.location_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| LifecycleError::Validation("location does not exist".to_string()))?;

        if let Some(org_id) = input.organization_id {
            if org_id != location.organization_id {
                return Err(LifecycleError::Validation(
                    "location does not belong to the given organization".to_string(),
                ));
            }
        }

        scope.require_location(location.organization_id, location.id, Access::Write)?;

        if let Some(hardware_id) = input.hardware_id {
            let item: Hardware = hardware::table
                .find(hardware_id)
                .first(conn)
                .optional()?
                .ok_or_else(|| {
                    LifecycleError::Validation("hardware does not exist".to_string())
                })?;
            if item.location_id != location.id {
                return Err(LifecycleError::Validation(
                    "hardware is not installed at the given location".to_string(),
                ));
            }
            gating::ensure_acknowledged(
                conn,
                scope.principal_id(),
                item.id,
                acknowledgment_validity,
                now_micros(),
            )?;
        }

        let ticket_number = allocate_ticket_number(conn, location.organization_id)?;
        let now = now_micros();
        let new_ticket = NewTicket {
            id: Uuid::new_v4(),
            ticket_number,
            organization_id: location.organization_id,
            location_id: location.id,
            hardware_id: input.hardware_id,
            title,
            description,
            priority: input.priority.as_str().to_string(),
            status: TicketStatus::Open.as_str().to_string(),
            submitted_by: scope.principal_id(),
            created_at: now,
            updated_at: now,
        };

        let ticket: Ticket = diesel::insert_into(tickets::table)
            .values(&new_ticket)
            .get_result(conn)?;

        append_event(
            conn,
            ticket.id,
            scope.principal_id(),
            EventRecord::new(EventType::Created)
                .values(None, Some(TicketStatus::Open.as_str().to_string()))
                .metadata(json!({
                    "ticket_number": ticket.ticket_number,
                    "priority": ticket.priority,
                })),
        )?;

        Ok(ticket)
    })?;

    info!(
        ticket_id = %ticket.id,
        ticket_number = %ticket.ticket_number,
        organization_id = %ticket.organization_id,
        "ticket created"
    );

    Ok(Transition {
        ticket,
        effects: Vec::new(),
    })
}

pub fn acknowledge_ticket(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
) -> LifecycleResult<Transition> {
    let ticket = conn.transaction::<Ticket, LifecycleError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        scope.ensure_writable()?;

        let is_assignee = ticket.assigned_to == Some(scope.principal_id())
            && scope.can_access_location(ticket.organization_id, ticket.location_id);
        if !(scope.is_platform_admin() || is_assignee) {
            return Err(AccessDenied::new(
                "only platform administrators or the assignee can acknowledge a ticket",
            )
            .into());
        }
        ensure_mutable(&ticket)?;
        if ticket.acknowledged_at.is_some() {
            return Err(LifecycleError::AlreadyAcknowledged);
        }

        let now = now_micros();
        let updated = diesel::update(
            tickets::table
                .filter(tickets::id.eq(ticket_id))
                .filter(tickets::acknowledged_at.is_null()),
        )
        .set((
            tickets::acknowledged_at.eq(now),
            tickets::updated_at.eq(now),
        ))
        .execute(conn)?;
        if updated == 0 {
            return Err(LifecycleError::AlreadyAcknowledged);
        }

        append_event(
            conn,
            ticket_id,
            scope.principal_id(),
            EventRecord::new(EventType::Updated).metadata(json!({
                "acknowledged_at": to_iso(now),
            })),
        )?;

        Ok(tickets::table.find(ticket_id).first(conn)?)
    })?;

    Ok(Transition {
        ticket,
        effects: Vec::new(),
    })
}

pub fn assign_ticket(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
    assignee_id: Uuid,
) -> LifecycleResult<Transition> {
    let (ticket, previous) = conn.transaction::<_, LifecycleError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        scope.require_location(ticket.organization_id, ticket.location_id, Access::Write)?;
        ensure_mutable(&ticket)?;

        if ticket.assigned_to == Some(assignee_id) {
            return Err(LifecycleError::InvalidState(
                "ticket is already assigned to this principal".to_string(),
            ));
        }
        if assignee_id != scope.principal_id()
            && !is_eligible_assignee(conn, ticket.organization_id, assignee_id)?
        {
            return Err(LifecycleError::Validation(
                "assignee must be a member of the ticket's organization".to_string(),
            ));
        }

        let now = now_micros();
        diesel::update(tickets::table.find(ticket_id))
            .set((
                tickets::assigned_to.eq(Some(assignee_id)),
                tickets::updated_at.eq(now),
            ))
            .execute(conn)?;

        append_event(
            conn,
            ticket_id,
            scope.principal_id(),
            EventRecord::new(EventType::Assigned).values(
                ticket.assigned_to.map(|id| id.to_string()),
                Some(assignee_id.to_string()),
            ),
        )?;

        let refreshed: Ticket = tickets::table.find(ticket_id).first(conn)?;
        Ok((refreshed, ticket.assigned_to))
    })?;

    info!(ticket_id = %ticket.id, assignee_id = %assignee_id, previous = ?previous, "ticket assigned");

    let mut effects = Vec::new();
    if assignee_id != scope.principal_id() {
        effects.push(notify(assignee_id, &ticket, NotificationKind::Assigned));
    }

    Ok(Transition { ticket, effects })
}

pub fn change_status(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
    next: TicketStatus,
    comment: Option<&str>,
) -> LifecycleResult<Transition> {
    let (ticket, previous) = conn.transaction::<_, LifecycleError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        scope.ensure_writable()?;

        let me = scope.principal_id();
        let staff = scope.is_org_admin(Some(ticket.organization_id));
        let in_location = scope.can_access_location(ticket.organization_id, ticket.location_id);
        let assignee = in_location && ticket.assigned_to == Some(me);
        let submitter_cancelling =
            in_location && ticket.submitted_by == me && next == TicketStatus::Cancelled;
        if !(staff || assignee || submitter_cancelling) {
            return Err(AccessDenied::new("not allowed to change the status of this ticket").into());
        }

        let current = stored_status(&ticket.status)?;
        current.check_transition(next)?;

        let now = now_micros();
        let updated = diesel::update(
            tickets::table
                .filter(tickets::id.eq(ticket_id))
                .filter(tickets::status.eq(current.as_str())),
        )
        .set((
            tickets::status.eq(next.as_str()),
            tickets::updated_at.eq(now),
        ))
        .execute(conn)?;
        if updated == 0 {
            return Err(LifecycleError::InvalidState(
                "ticket status changed concurrently".to_string(),
            ));
        }

        if current == TicketStatus::Open {
            diesel::update(
                tickets::table
                    .filter(tickets::id.eq(ticket_id))
                    .filter(tickets::first_response_at.is_null()),
            )
            .set(tickets::first_response_at.eq(now))
            .execute(conn)?;
        }
        match next {
            TicketStatus::Resolved => {
                diesel::update(
                    tickets::table
                        .filter(tickets::id.eq(ticket_id))
                        .filter(tickets::resolved_at.is_null()),
                )
                .set(tickets::resolved_at.eq(now))
                .execute(conn)?;
            }
            TicketStatus::Closed => {
                diesel::update(
                    tickets::table
                        .filter(tickets::id.eq(ticket_id))
                        .filter(tickets::closed_at.is_null()),
                )
                .set(tickets::closed_at.eq(now))
                .execute(conn)?;
            }
            _ => {}
        }

        append_event(
            conn,
            ticket_id,
            me,
            EventRecord::new(EventType::StatusChanged)
                .values(
                    Some(current.as_str().to_string()),
                    Some(next.as_str().to_string()),
                )
                .comment(comment),
        )?;

        let refreshed: Ticket = tickets::table.find(ticket_id).first(conn)?;
        Ok((refreshed, current))
    })?;

    info!(
        ticket_id = %ticket.id,
        from = %previous,
        to = %next,
        "ticket status changed"
    );

    let mut effects = Vec::new();
    let actor = scope.principal_id();
    if ticket.submitted_by != actor {
        effects.push(notify(ticket.submitted_by, &ticket, NotificationKind::StatusChanged));
    }
    if let Some(assignee) = ticket.assigned_to {
        if assignee != actor && assignee != ticket.submitted_by {
            effects.push(notify(assignee, &ticket, NotificationKind::StatusChanged));
        }
    }
    if next == TicketStatus::Closed {
        effects.push(SideEffect::Summarize {
            ticket_id: ticket.id,
        });
    }

    Ok(Transition { ticket, effects })
}

pub fn edit_ticket(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
    edit: TicketEdit,
) -> LifecycleResult<Transition> {
    if edit.title.is_none() && edit.description.is_none() && edit.priority.is_none() {
        return Err(LifecycleError::Validation(
            "at least one of title, description or priority is required".to_string(),
        ));
    }

    let ticket = conn.transaction::<Ticket, LifecycleError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        scope.require_org_admin(ticket.organization_id)?;
        ensure_mutable(&ticket)?;

        let mut changes = Map::new();
        let mut title = ticket.title.clone();
        let mut description = ticket.description.clone();
        let mut priority = ticket.priority.clone();

        if let Some(value) = edit.title.as_deref() {
            let value = validate_title(value)?;
            if value != ticket.title {
                changes.insert("title".into(), json!({ "old": ticket.title, "new": value }));
                title = value;
            }
        }
        if let Some(value) = edit.description.as_deref() {
            let value = validate_description(value)?;
            if value != ticket.description {
                changes.insert(
                    "description".into(),
                    json!({ "old": ticket.description, "new": value }),
                );
                description = value;
            }
        }
        if let Some(value) = edit.priority {
            if value.as_str() != ticket.priority {
                changes.insert(
                    "priority".into(),
                    json!({ "old": ticket.priority, "new": value.as_str() }),
                );
                priority = value.as_str().to_string();
            }
        }

        if changes.is_empty() {
            return Err(LifecycleError::Validation(
                "edit does not change the ticket".to_string(),
            ));
        }

        diesel::update(tickets::table.find(ticket_id))
            .set((
                tickets::title.eq(&title),
                tickets::description.eq(&description),
                tickets::priority.eq(&priority),
                tickets::updated_at.eq(now_micros()),
            ))
            .execute(conn)?;

        append_event(
            conn,
            ticket_id,
            scope.principal_id(),
            EventRecord::new(EventType::Updated).metadata(json!({ "changes": changes })),
        )?;

        Ok(tickets::table.find(ticket_id).first(conn)?)
    })?;

    Ok(Transition {
        ticket,
        effects: Vec::new(),
    })
}

pub fn add_comment(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
    body: &str,
    is_internal: bool,
) -> LifecycleResult<(TicketComment, Vec<SideEffect>)> {
    let body = body.trim();
    if body.is_empty() {
        return Err(LifecycleError::Validation("comment must not be empty".to_string()));
    }

    let (ticket, comment) = conn.transaction::<_, LifecycleError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        scope.ensure_writable()?;
        if !readable(scope, &ticket) {
            return Err(AccessDenied::new("no access to this ticket").into());
        }
        let staff = scope.is_org_admin(Some(ticket.organization_id));
        if is_internal && !staff {
            return Err(AccessDenied::new("only staff can post internal comments").into());
        }
        ensure_mutable(&ticket)?;

        let me = scope.principal_id();
        let comment: TicketComment = diesel::insert_into(ticket_comments::table)
            .values(&NewTicketComment {
                id: Uuid::new_v4(),
                ticket_id,
                author_id: me,
                body: body.to_string(),
                is_internal,
            })
            .get_result(conn)?;

        let now = now_micros();
        let responder = staff || ticket.assigned_to == Some(me);
        if responder && me != ticket.submitted_by {
            diesel::update(
                tickets::table
                    .filter(tickets::id.eq(ticket_id))
                    .filter(tickets::first_response_at.is_null()),
            )
            .set(tickets::first_response_at.eq(now))
            .execute(conn)?;
        }
        diesel::update(tickets::table.find(ticket_id))
            .set(tickets::updated_at.eq(now))
            .execute(conn)?;

        append_event(
            conn,
            ticket_id,
            me,
            EventRecord::new(EventType::CommentAdded)
                .comment((!is_internal).then_some(body))
                .metadata(json!({
                    "comment_id": comment.id,
                    "is_internal": is_internal,
                })),
        )?;

        Ok((ticket, comment))
    })?;

    let mut effects = Vec::new();
    let me = scope.principal_id();
    if !is_internal && ticket.submitted_by != me {
        effects.push(notify(ticket.submitted_by, &ticket, NotificationKind::CommentAdded));
    }
    if let Some(assignee) = ticket.assigned_to {
        if assignee != me && assignee != ticket.submitted_by {
            effects.push(notify(assignee, &ticket, NotificationKind::CommentAdded));
        }
    }

    Ok((comment, effects))
}

pub fn delete_ticket(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
) -> LifecycleResult<()> {
    scope.require_platform_admin()?;

    let ticket = conn.transaction::<Ticket, LifecycleError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        // Comments cascade with the row; the event ledger is kept.
        let deleted = diesel::delete(tickets::table.find(ticket_id)).execute(conn)?;
        if deleted == 0 {
            return Err(LifecycleError::NotFound);
        }
        Ok(ticket)
    })?;

    info!(
        target: "access",
        actor_id = %scope.principal_id(),
        ticket_id = %ticket.id,
        ticket_number = %ticket.ticket_number,
        organization_id = %ticket.organization_id,
        "ticket permanently deleted"
    );

    Ok(())
}

pub fn rate_ticket(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
    rating: i32,
    feedback: Option<&str>,
) -> LifecycleResult<Transition> {
    let feedback = feedback.map(str::trim).filter(|value| !value.is_empty());

    let ticket = conn.transaction::<Ticket, LifecycleError, _>(|conn| {
        let ticket = lock_ticket(conn, ticket_id)?;
        if stored_status(&ticket.status)? != TicketStatus::Closed {
            return Err(LifecycleError::InvalidState(
                "only closed tickets can be rated".to_string(),
            ));
        }
        scope.ensure_writable()?;
        if ticket.submitted_by != scope.principal_id() {
            return Err(AccessDenied::new("only the submitter can rate this ticket").into());
        }
        if !(1..=5).contains(&rating) {
            return Err(LifecycleError::Validation(
                "rating must be between 1 and 5".to_string(),
            ));
        }
        if ticket.customer_satisfaction_rating.is_some() {
            return Err(LifecycleError::AlreadyRated);
        }

        let updated = diesel::update(
            tickets::table
                .filter(tickets::id.eq(ticket_id))
                .filter(tickets::status.eq(TicketStatus::Closed.as_str()))
                .filter(tickets::customer_satisfaction_rating.is_null()),
        )
        .set((
            tickets::customer_satisfaction_rating.eq(Some(rating)),
            tickets::customer_feedback.eq(feedback),
            tickets::updated_at.eq(now_micros()),
        ))
        .execute(conn)?;
        if updated == 0 {
            return Err(LifecycleError::AlreadyRated);
        }

        append_event(
            conn,
            ticket_id,
            scope.principal_id(),
            EventRecord::new(EventType::Updated)
                .values(None, Some(rating.to_string()))
                .comment(feedback)
                .metadata(json!({ "customer_satisfaction_rating": rating })),
        )?;

        Ok(tickets::table.find(ticket_id).first(conn)?)
    })?;

    Ok(Transition {
        ticket,
        effects: Vec::new(),
    })
}

pub fn get_ticket(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
) -> LifecycleResult<Ticket> {
    load_visible(conn, scope, ticket_id)
}

pub fn list_tickets(
    conn: &mut PgConnection,
    scope: &AccessScope,
    filter: &TicketFilter,
) -> LifecycleResult<Vec<Ticket>> {
    let mut query = tickets::table.into_boxed();

    if let TicketVisibility::Restricted {
        principal_id,
        organization_ids,
        location_ids,
    } = scope.visibility()
    {
        query = query.filter(
            tickets::organization_id
                .eq_any(organization_ids)
                .or(tickets::location_id.eq_any(location_ids))
                .or(tickets::submitted_by.eq(principal_id))
                .or(tickets::assigned_to.is_not_distinct_from(principal_id)),
        );
    }

    if let Some(status) = filter.status {
        query = query.filter(tickets::status.eq(status.as_str()));
    }
    if let Some(org_id) = filter.organization_id {
        query = query.filter(tickets::organization_id.eq(org_id));
    }
    if let Some(location_id) = filter.location_id {
        query = query.filter(tickets::location_id.eq(location_id));
    }

    let limit = filter.limit.unwrap_or(100).clamp(1, 500);
    let offset = filter.offset.unwrap_or(0).max(0);

    Ok(query
        .order(tickets::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(conn)?)
}

pub fn list_comments(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
) -> LifecycleResult<Vec<TicketComment>> {
    let ticket = load_visible(conn, scope, ticket_id)?;
    let mut query = ticket_comments::table
        .filter(ticket_comments::ticket_id.eq(ticket_id))
        .into_boxed();
    if !scope.is_org_admin(Some(ticket.organization_id)) {
        query = query.filter(ticket_comments::is_internal.eq(false));
    }
    Ok(query.order(ticket_comments::created_at.asc()).load(conn)?)
}

/// Loads a ticket the caller may read. Tickets outside the caller's reach are
/// reported as missing.
pub(crate) fn load_visible(
    conn: &mut PgConnection,
    scope: &AccessScope,
    ticket_id: Uuid,
) -> LifecycleResult<Ticket> {
    let ticket: Ticket = tickets::table
        .find(ticket_id)
        .first(conn)
        .optional()?
        .ok_or(LifecycleError::NotFound)?;

    if readable(scope, &ticket) {
        Ok(ticket)
    } else {
        Err(LifecycleError::NotFound)
    }
}

fn readable(scope: &AccessScope, ticket: &Ticket) -> bool {
    scope.visibility().allows(
        ticket.organization_id,
        ticket.location_id,
        ticket.submitted_by,
        ticket.assigned_to,
    )
}

fn lock_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> LifecycleResult<Ticket> {
    tickets::table
        .find(ticket_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(LifecycleError::NotFound)
}

fn ensure_mutable(ticket: &Ticket) -> LifecycleResult<()> {
    let status = stored_status(&ticket.status)?;
    if status.is_terminal() {
        return Err(LifecycleError::InvalidState(format!(
            "ticket is {status} and can no longer be modified"
        )));
    }
    Ok(())
}

fn allocate_ticket_number(conn: &mut PgConnection, organization_id: Uuid) -> LifecycleResult<String> {
    let (prefix, sequence): (String, i64) = diesel::update(organizations::table.find(organization_id))
        .set(organizations::ticket_sequence.eq(organizations::ticket_sequence + 1))
        .returning((organizations::ticket_prefix, organizations::ticket_sequence))
        .get_result(conn)?;
    Ok(format_ticket_number(&prefix, sequence))
}

fn format_ticket_number(prefix: &str, sequence: i64) -> String {
    format!("{prefix}-{sequence:06}")
}

fn is_eligible_assignee(
    conn: &mut PgConnection,
    organization_id: Uuid,
    principal_id: Uuid,
) -> LifecycleResult<bool> {
    let principal: Option<Principal> = principals::table
        .find(principal_id)
        .filter(principals::disabled_at.is_null())
        .first(conn)
        .optional()?;
    let Some(principal) = principal else {
        return Ok(false);
    };

    if principal.is_platform_admin {
        return Ok(principal.admin_tier.as_deref() != Some(AdminTier::ReadOnly.as_str()));
    }

    let member: Option<String> = memberships::table
        .filter(memberships::principal_id.eq(principal_id))
        .filter(memberships::organization_id.eq(organization_id))
        .select(memberships::role)
        .first(conn)
        .optional()?;
    Ok(member.is_some())
}

fn validate_title(value: &str) -> LifecycleResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LifecycleError::Validation("title must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_TITLE_LENGTH {
        return Err(LifecycleError::Validation(format!(
            "title must be at most {MAX_TITLE_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_description(value: &str) -> LifecycleResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LifecycleError::Validation(
            "description must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn notify(recipient_id: Uuid, ticket: &Ticket, kind: NotificationKind) -> SideEffect {
    SideEffect::Notify(Notification {
        recipient_id,
        ticket_id: ticket.id,
        ticket_number: ticket.ticket_number.clone(),
        kind,
    })
}
