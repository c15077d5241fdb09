use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access::AccessScope;
use crate::effects::dispatch;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{
    self, events::EventResponse, BatchSummaryReport, NewTicketInput, Priority, TicketEdit,
    TicketFilter, TicketStatus, Transition,
};
use crate::models::{Ticket, TicketComment};
use crate::state::AppState;
use crate::utils::json::{classify_nullable, NullableValue};
use crate::utils::time::{to_iso, to_iso_opt};

#[derive(Serialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub ticket_number: String,
    pub organization_id: Uuid,
    pub location_id: Uuid,
    pub hardware_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub status: String,
    pub submitted_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
    pub first_response_at: Option<String>,
    pub acknowledged_at: Option<String>,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
    pub closed_summary: Option<String>,
    pub customer_satisfaction_rating: Option<i32>,
    pub customer_feedback: Option<String>,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            ticket_number: ticket.ticket_number,
            organization_id: ticket.organization_id,
            location_id: ticket.location_id,
            hardware_id: ticket.hardware_id,
            title: ticket.title,
            description: ticket.description,
            priority: ticket.priority,
            status: ticket.status,
            submitted_by: ticket.submitted_by,
            assigned_to: ticket.assigned_to,
            created_at: to_iso(ticket.created_at),
            updated_at: to_iso(ticket.updated_at),
            first_response_at: to_iso_opt(ticket.first_response_at),
            acknowledged_at: to_iso_opt(ticket.acknowledged_at),
            resolved_at: to_iso_opt(ticket.resolved_at),
            closed_at: to_iso_opt(ticket.closed_at),
            closed_summary: ticket.closed_summary,
            customer_satisfaction_rating: ticket.customer_satisfaction_rating,
            customer_feedback: ticket.customer_feedback,
        }
    }
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub is_internal: bool,
    pub created_at: String,
}

impl From<TicketComment> for CommentResponse {
    fn from(comment: TicketComment) -> Self {
        Self {
            id: comment.id,
            ticket_id: comment.ticket_id,
            author_id: comment.author_id,
            body: comment.body,
            is_internal: comment.is_internal,
            created_at: to_iso(comment.created_at),
        }
    }
}

#[derive(Deserialize, Default)]
pub struct TicketListQuery {
    pub status: Option<String>,
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// Fields are optional so that missing ones become a 400 with a useful message.
#[derive(Deserialize)]
pub struct CreateTicketRequest {
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub hardware_id: Option<Uuid>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub assignee_id: Uuid,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub body: String,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Deserialize)]
pub struct SatisfactionRequest {
    pub rating: Option<i64>,
    pub feedback: Option<String>,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub ticket_id: Uuid,
    pub summary: String,
    pub generated: bool,
}

fn respond(state: &AppState, transition: Transition) -> Json<TicketResponse> {
    let Transition { ticket, effects } = transition;
    dispatch(state, effects);
    Json(TicketResponse::from(ticket))
}

fn parse_priority(value: &str) -> AppResult<Priority> {
    value
        .parse()
        .map_err(|_| AppError::bad_request(format!("unknown priority: {value}")))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    scope: AccessScope,
    Query(query): Query<TicketListQuery>,
) -> AppResult<Json<Vec<TicketResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(|value| {
            value
                .parse::<TicketStatus>()
                .map_err(|_| AppError::bad_request(format!("unknown status: {value}")))
        })
        .transpose()?;

    let filter = TicketFilter {
        status,
        organization_id: query.organization_id,
        location_id: query.location_id,
        limit: query.limit,
        offset: query.offset,
    };

    let mut conn = state.db()?;
    let tickets = lifecycle::list_tickets(&mut conn, &scope, &filter)?;
    Ok(Json(tickets.into_iter().map(TicketResponse::from).collect()))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    scope: AccessScope,
    Json(payload): Json<CreateTicketRequest>,
) -> AppResult<(StatusCode, Json<TicketResponse>)> {
    let location_id = payload
        .location_id
        .ok_or_else(|| AppError::bad_request("location_id is required"))?;
    let title = payload
        .title
        .ok_or_else(|| AppError::bad_request("title is required"))?;
    let description = payload
        .description
        .ok_or_else(|| AppError::bad_request("description is required"))?;
    let priority = match payload.priority.as_deref() {
        Some(value) => parse_priority(value)?,
        None => Priority::Normal,
    };

    let input = NewTicketInput {
        organization_id: payload.organization_id,
        location_id,
        hardware_id: payload.hardware_id,
        title,
        description,
        priority,
    };

    let mut conn = state.db()?;
    let transition =
        lifecycle::create_ticket(&mut conn, &scope, input, state.acknowledgment_validity())?;
    drop(conn);

    Ok((StatusCode::CREATED, respond(&state, transition)))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<TicketResponse>> {
    let mut conn = state.db()?;
    let ticket = lifecycle::get_ticket(&mut conn, &scope, ticket_id)?;
    Ok(Json(TicketResponse::from(ticket)))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<TicketResponse>> {
    let mut edit = TicketEdit::default();

    for (field, slot) in [("title", &mut edit.title), ("description", &mut edit.description)] {
        match classify_nullable(body.get(field)).map_err(AppError::bad_request)? {
            NullableValue::Omitted => {}
            NullableValue::Null => {
                return Err(AppError::bad_request(format!("{field} cannot be null")));
            }
            NullableValue::String(value) => *slot = Some(value),
        }
    }
    match classify_nullable(body.get("priority")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => {}
        NullableValue::Null => return Err(AppError::bad_request("priority cannot be null")),
        NullableValue::String(value) => edit.priority = Some(parse_priority(&value)?),
    }

    let mut conn = state.db()?;
    let transition = lifecycle::edit_ticket(&mut conn, &scope, ticket_id, edit)?;
    drop(conn);

    Ok(respond(&state, transition))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    lifecycle::delete_ticket(&mut conn, &scope, ticket_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn acknowledge_ticket(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<TicketResponse>> {
    let mut conn = state.db()?;
    let transition = lifecycle::acknowledge_ticket(&mut conn, &scope, ticket_id)?;
    drop(conn);
    Ok(respond(&state, transition))
}

pub async fn assign_ticket(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> AppResult<Json<TicketResponse>> {
    let mut conn = state.db()?;
    let transition =
        lifecycle::assign_ticket(&mut conn, &scope, ticket_id, payload.assignee_id)?;
    drop(conn);
    Ok(respond(&state, transition))
}

pub async fn change_status(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<TicketResponse>> {
    let next: TicketStatus = payload
        .status
        .parse()
        .map_err(|_| AppError::bad_request(format!("unknown status: {}", payload.status)))?;
    let comment = payload
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let mut conn = state.db()?;
    let transition = lifecycle::change_status(&mut conn, &scope, ticket_id, next, comment)?;
    drop(conn);
    Ok(respond(&state, transition))
}

pub async fn list_comments(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let mut conn = state.db()?;
    let comments = lifecycle::list_comments(&mut conn, &scope, ticket_id)?;
    Ok(Json(comments.into_iter().map(CommentResponse::from).collect()))
}

pub async fn add_comment(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<CommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let mut conn = state.db()?;
    let (comment, effects) =
        lifecycle::add_comment(&mut conn, &scope, ticket_id, &payload.body, payload.is_internal)?;
    drop(conn);

    dispatch(&state, effects);
    Ok((StatusCode::CREATED, Json(CommentResponse::from(comment))))
}

pub async fn list_events(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<Vec<EventResponse>>> {
    let mut conn = state.db()?;
    let events = lifecycle::list_events(&mut conn, &scope, ticket_id)?;
    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}

pub async fn rate_ticket(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<SatisfactionRequest>,
) -> AppResult<Json<TicketResponse>> {
    let rating = payload
        .rating
        .ok_or_else(|| AppError::bad_request("rating is required"))?;
    // Out-of-range values are rejected by the lifecycle after its state checks.
    let rating = i32::try_from(rating).unwrap_or(i32::MAX);

    let mut conn = state.db()?;
    let transition = lifecycle::rate_ticket(
        &mut conn,
        &scope,
        ticket_id,
        rating,
        payload.feedback.as_deref(),
    )?;
    drop(conn);
    Ok(respond(&state, transition))
}

pub async fn summarize_ticket(
    State(state): State<AppState>,
    scope: AccessScope,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<SummaryResponse>> {
    scope.require_platform_admin()?;

    let outcome = lifecycle::summarize_ticket(&state, ticket_id).await?;
    Ok(Json(SummaryResponse {
        ticket_id,
        generated: outcome.generated(),
        summary: outcome.summary().to_string(),
    }))
}

pub async fn generate_all_summaries(
    State(state): State<AppState>,
    scope: AccessScope,
) -> AppResult<Json<BatchSummaryReport>> {
    scope.require_platform_admin()?;

    info!(
        target: "access",
        actor_id = %scope.principal_id(),
        "batch summary generation requested"
    );
    let report = lifecycle::generate_all_summaries(&state).await?;
    Ok(Json(report))
}
