use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = principals)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub is_platform_admin: bool,
    pub admin_tier: Option<String>,
    pub disabled_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = principals)]
pub struct NewPrincipal {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub is_platform_admin: bool,
    pub admin_tier: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub ticket_prefix: String,
    pub ticket_sequence: i64,
    pub contact_email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organizations)]
pub struct NewOrganization {
    pub id: Uuid,
    pub name: String,
    pub ticket_prefix: String,
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = memberships)]
#[diesel(belongs_to(Principal))]
#[diesel(belongs_to(Organization))]
#[diesel(primary_key(principal_id, organization_id))]
pub struct Membership {
    pub principal_id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = memberships)]
pub struct NewMembership {
    pub principal_id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = locations)]
#[diesel(belongs_to(Organization))]
pub struct Location {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = locations)]
pub struct NewLocation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = location_assignments)]
pub struct NewLocationAssignment {
    pub principal_id: Uuid,
    pub location_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = hardware)]
#[diesel(belongs_to(Location))]
pub struct Hardware {
    pub id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub hardware_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub status: String,
    pub installation_date: Option<NaiveDate>,
    pub warranty_expiration: Option<NaiveDate>,
    pub internal_notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = hardware)]
pub struct NewHardware {
    pub id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub hardware_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub status: String,
    pub installation_date: Option<NaiveDate>,
    pub warranty_expiration: Option<NaiveDate>,
    pub internal_notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = procedures)]
#[diesel(belongs_to(Organization))]
pub struct Procedure {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub body: String,
    pub version: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = procedures)]
pub struct NewProcedure {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = procedure_hardware)]
pub struct NewProcedureHardware {
    pub procedure_id: Uuid,
    pub hardware_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = procedure_acknowledgments)]
pub struct ProcedureAcknowledgment {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub hardware_id: Uuid,
    pub procedure_id: Uuid,
    pub procedure_version: i32,
    pub acknowledged_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = procedure_acknowledgments)]
pub struct NewProcedureAcknowledgment {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub hardware_id: Uuid,
    pub procedure_id: Uuid,
    pub procedure_version: i32,
    pub acknowledged_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = tickets)]
#[diesel(belongs_to(Organization))]
#[diesel(belongs_to(Location))]
pub struct Ticket {
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub first_response_at: Option<NaiveDateTime>,
    pub acknowledged_at: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
    pub closed_at: Option<NaiveDateTime>,
    pub closed_summary: Option<String>,
    pub customer_satisfaction_rating: Option<i32>,
    pub customer_feedback: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_events)]
#[diesel(belongs_to(Ticket))]
pub struct TicketEvent {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub actor_id: Uuid,
    pub event_type: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_events)]
pub struct NewTicketEvent {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub actor_id: Uuid,
    pub event_type: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_comments)]
#[diesel(belongs_to(Ticket))]
pub struct TicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub is_internal: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_comments)]
pub struct NewTicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub is_internal: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(Principal))]
pub struct RefreshToken {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
